pub mod instruments;
pub mod notifier;
pub mod record_sink;
pub mod runner;
pub mod signals;
pub mod tick_source;

pub use instruments::InstrumentCatalog;
pub use notifier::{MemoryNotifier, Notifier, TracingNotifier};
pub use record_sink::{MemorySink, RecordSink, RedisKeySink};
pub use runner::{RunnerStats, SignalRunner};
pub use signals::{DecisionGate, SignalAggregator, SignalPipeline, TimeWindowAverage};
pub use tick_source::{
    MemorySource, RedisKeyScanSource, RedisReplaySource, RedisStreamSource, RedisTickSource,
    TickSource,
};
