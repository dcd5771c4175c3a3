//! Monitoring core: event bus, metric aggregation, alert rules, and the
//! coalescing live stream.
//!
//! Producers never block on slow consumers. Consumers lagging past the
//! in-memory ring receive a missed-events notice and can re-read the gap
//! from the durable tail by sequence.

pub mod alerts;
pub mod bus;
pub mod metrics;
pub mod notify;
pub mod stream;

pub use alerts::{AlertEngine, AlertExpr, AlertRule};
pub use bus::{BusMessage, EventBus, Subscription};
pub use metrics::MetricsRegistry;
pub use notify::{LogChannel, NotificationChannel, WebhookChannel};
pub use stream::MetricCoalescer;
