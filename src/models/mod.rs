pub mod directive;
pub mod event;

pub use directive::{CounterDirective, CounterType, IncrementOp, TimeGranularity};
pub use event::{ParsedEvent, RouteRecord, TrackingEvent, VisitorIdentity};
