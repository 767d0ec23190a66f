//! Runs every consumer against its durable binding.
//!
//! Each binding gets its own task. Within a binding messages are handled one
//! at a time; a failed message stream is re-opened with backoff until the
//! worker is cancelled.

use std::future::Future;
use std::sync::Arc;

use async_nats::jetstream::consumer::{pull, Consumer as PullConsumer};
use async_nats::jetstream::stream::Stream as JetStream;
use backon::BackoffBuilder;
use futures::{Stream, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{binding_config, BusError, Delivery, NatsDelivery, Result};
use crate::consumer::Consumer;
use crate::utils::retry::{stream_backoff, STREAM_MAX_DELAY};

/// Binds consumers to the findings stream.
pub struct Worker {
    stream: JetStream,
    consumers: Vec<Arc<Consumer>>,
}

impl Worker {
    pub fn new(stream: JetStream, consumers: Vec<Arc<Consumer>>) -> Self {
        Self { stream, consumers }
    }

    /// Create or update every durable binding, then consume until cancelled.
    ///
    /// Fails without consuming anything if any binding cannot be created.
    /// Returns once every binding loop has stopped.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut bindings = Vec::with_capacity(self.consumers.len());
        for consumer in self.consumers {
            let pull = self
                .stream
                .create_consumer(binding_config(consumer.name(), consumer.subject()))
                .await
                .map_err(|e| BusError::Consumer {
                    name: consumer.name().to_string(),
                    message: e.to_string(),
                })?;
            info!(
                consumer = %consumer.name(),
                subject = %consumer.subject(),
                "Durable binding ready"
            );
            bindings.push((consumer, pull));
        }

        let mut tasks = JoinSet::new();
        for (consumer, pull) in bindings {
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let open = move || open_messages(pull.clone());
                run_binding(consumer, open, cancel).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Binding task failed");
            }
        }
        info!("All bindings stopped");
        Ok(())
    }
}

async fn open_messages(
    pull: PullConsumer<pull::Config>,
) -> Result<impl Stream<Item = Result<NatsDelivery>>> {
    let messages = pull
        .messages()
        .await
        .map_err(|e| BusError::Messages(e.to_string()))?;
    Ok(messages.map(|message| {
        message
            .map(NatsDelivery::new)
            .map_err(|e| BusError::Messages(e.to_string()))
    }))
}

/// Consume one binding until cancelled.
///
/// `open` yields a fresh message stream; it is called again with backoff
/// whenever the current stream fails or ends.
pub async fn run_binding<F, Fut, S, D>(consumer: Arc<Consumer>, mut open: F, cancel: CancellationToken)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    S: Stream<Item = Result<D>>,
    D: Delivery,
{
    let backoff = stream_backoff();
    let mut delays = backoff.build();

    loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            opened = open() => opened,
        };

        match opened {
            Ok(messages) => {
                let mut messages = std::pin::pin!(messages);
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        next = messages.next() => next,
                    };
                    match next {
                        Some(Ok(delivery)) => {
                            delays = backoff.build();
                            consumer.handle(&delivery, &cancel).await;
                        }
                        Some(Err(e)) => {
                            warn!(consumer = %consumer.name(), error = %e, "Message stream failed");
                            break;
                        }
                        None => {
                            warn!(consumer = %consumer.name(), "Message stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(consumer = %consumer.name(), error = %e, "Failed to open message stream");
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        let delay = delays.next().unwrap_or(STREAM_MAX_DELAY);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(consumer = %consumer.name(), "Binding stopped");
}
