use crate::buffer::GlobalBuffer;
use crate::clock::{Clock, SystemClock};
use crate::config::{BufferingConfig, ConfigHandle};
use crate::flush::FlushError;
use crate::layer::BufferingLayer;
use crate::provider::{BufferProvider, ScopedBufferProvider, ThreadScope};
use crate::sink::BufferedSink;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Handles to the wired-up buffering subsystem.
///
/// The host keeps this around to trigger flushes (typically from its
/// error path), manage scope lifecycles through the provider, and push
/// configuration updates.
pub struct BufferingHandle {
    config: ConfigHandle,
    global: Arc<GlobalBuffer>,
    provider: Arc<ScopedBufferProvider>,
}

impl BufferingHandle {
    /// Release the global buffer's contents to the sink.
    pub fn flush_global(&self) -> Result<(), FlushError> {
        self.global.flush()
    }

    pub fn global(&self) -> &Arc<GlobalBuffer> {
        &self.global
    }

    pub fn provider(&self) -> &Arc<ScopedBufferProvider> {
        &self.provider
    }

    /// Live configuration; `update` takes effect atomically for all
    /// buffers sharing this handle.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }
}

/// Build the layer and all supporting pieces from a configuration and a
/// sink, without installing anything globally.
pub fn build_buffering(
    config: BufferingConfig,
    sink: Arc<dyn BufferedSink>,
) -> (BufferingLayer, BufferingHandle) {
    build_buffering_with_clock(config, sink, Arc::new(SystemClock))
}

/// Same as [`build_buffering`] but with a caller-supplied clock, for
/// deterministic tests.
pub fn build_buffering_with_clock(
    config: BufferingConfig,
    sink: Arc<dyn BufferedSink>,
    clock: Arc<dyn Clock>,
) -> (BufferingLayer, BufferingHandle) {
    let config = ConfigHandle::new(config);
    let global = Arc::new(GlobalBuffer::new(
        config.clone(),
        Arc::clone(&sink),
        Arc::clone(&clock),
    ));
    let provider = Arc::new(ScopedBufferProvider::new(
        Arc::clone(&global),
        Arc::new(ThreadScope),
        config.clone(),
        Arc::clone(&sink),
        Arc::clone(&clock),
    ));
    let layer =
        BufferingLayer::new(Arc::clone(&provider) as Arc<dyn BufferProvider>, sink, clock);

    (layer, BufferingHandle { config, global, provider })
}

/// Install buffering as the global `tracing` subscriber.
///
/// With `enable_stdout` an `fmt` layer is stacked on top, so events stay
/// visible on the console while the buffered copies wait for a flush.
pub fn init_buffering_with_config(
    sink: Arc<dyn BufferedSink>,
    config: BufferingConfig,
    enable_stdout: bool,
) -> BufferingHandle {
    let (layer, handle) = build_buffering(config, sink);

    if enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    }

    handle
}

/// Install buffering with default configuration.
pub fn init_buffering(sink: Arc<dyn BufferedSink>) -> BufferingHandle {
    init_buffering_with_config(sink, BufferingConfig::default(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterRule;
    use crate::noop_sink::CollectingSink;

    #[test]
    fn built_pieces_share_one_config() {
        let sink = Arc::new(CollectingSink::new());
        let (_layer, handle) = build_buffering(
            BufferingConfig::default(),
            Arc::clone(&sink) as Arc<dyn BufferedSink>,
        );

        // No rules yet, nothing is buffered.
        assert!(!handle.global().is_enabled(
            "a",
            crate::record::LogLevel::Error,
            &crate::record::EventId::new(0),
            &crate::record::AttributeList::new(),
        ));

        handle.config().update(BufferingConfig {
            rules: vec![FilterRule::new()],
            ..BufferingConfig::default()
        });
        assert!(handle.global().is_enabled(
            "a",
            crate::record::LogLevel::Error,
            &crate::record::EventId::new(0),
            &crate::record::AttributeList::new(),
        ));
    }

    #[test]
    fn end_to_end_buffer_and_flush() {
        let sink = Arc::new(CollectingSink::new());
        let (layer, handle) = build_buffering(
            BufferingConfig {
                rules: vec![FilterRule::new()],
                ..BufferingConfig::default()
            },
            Arc::clone(&sink) as Arc<dyn BufferedSink>,
        );
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("held back");
        });
        assert!(sink.is_empty());

        handle.flush_global().unwrap();
        assert_eq!(sink.messages(), vec!["held back"]);
    }
}
