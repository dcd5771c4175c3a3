//! Server wiring: config, logging, monitor core, engine, REST surface.

use crate::cli::ServeArgs;
use anyhow::{Context, Result};
use quarry_api::{router, ApiState};
use quarry_engine::{Engine, RealDriverFactory};
use quarry_monitor::{AlertEngine, AlertRule, EventBus, LogChannel, MetricsRegistry, NotificationChannel, WebhookChannel};
use quarry_protocol::config::{AlertRuleSettings, ChannelSettings, QuarryConfig};
use quarry_protocol::defaults::ALERT_EVAL_INTERVAL_SECS;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn serve(args: ServeArgs, verbose: bool) -> Result<()> {
    quarry_logging::init_logging(quarry_logging::LogConfig {
        app_name: "quarry-serve",
        verbose,
    })?;

    let mut config = QuarryConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(db) = args.db {
        config.database.url = db;
    }

    let db = quarry_db::QuarryDb::connect(&config.database.url)
        .await
        .context("opening database")?;
    let bus = Arc::new(EventBus::new(config.monitor.event_ring_capacity));
    let metrics = Arc::new(MetricsRegistry::default());

    let engine = Engine::start(
        config.engine.clone(),
        config.sources.clone(),
        db,
        quarry_ai::LocalAi::capabilities(),
        Arc::new(RealDriverFactory),
        bus.clone(),
        metrics.clone(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("engine start: {e}"))?;

    let rules = build_alert_rules(&config.monitor.alert_rules)?;
    let alerts = Arc::new(AlertEngine::new(rules, metrics.clone(), bus.clone()));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(
        alerts
            .clone()
            .run(Duration::from_secs(ALERT_EVAL_INTERVAL_SECS), shutdown_rx),
    );

    let app = router(ApiState {
        engine,
        alerts,
    });
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "quarry serving");
    axum::serve(listener, app).await.context("server loop")?;
    Ok(())
}

/// Default rules applied when the config declares none.
fn default_alert_rules() -> Vec<AlertRuleSettings> {
    vec![
        AlertRuleSettings {
            name: "high-error-rate".to_string(),
            expr: "rate(errors_total[5m]) > 0.5".to_string(),
            for_secs: 60,
            severity: quarry_protocol::types::AlertSeverity::Warning,
            labels: Default::default(),
            channels: vec![ChannelSettings::Log],
        },
        AlertRuleSettings {
            name: "queue-backlog".to_string(),
            expr: "value(queue_depth) > 100".to_string(),
            for_secs: 300,
            severity: quarry_protocol::types::AlertSeverity::Info,
            labels: Default::default(),
            channels: vec![ChannelSettings::Log],
        },
    ]
}

fn build_alert_rules(settings: &[AlertRuleSettings]) -> Result<Vec<AlertRule>> {
    let settings = if settings.is_empty() {
        default_alert_rules()
    } else {
        settings.to_vec()
    };

    settings
        .iter()
        .map(|rule| {
            let expr = rule
                .expr
                .parse()
                .map_err(|e| anyhow::anyhow!("alert rule {}: {e}", rule.name))?;
            let channels: Vec<Arc<dyn NotificationChannel>> = if rule.channels.is_empty() {
                vec![Arc::new(LogChannel)]
            } else {
                rule.channels
                    .iter()
                    .map(|channel| -> Arc<dyn NotificationChannel> {
                        match channel {
                            ChannelSettings::Log => Arc::new(LogChannel),
                            ChannelSettings::Webhook { url } => {
                                Arc::new(WebhookChannel::new(url.clone()))
                            }
                        }
                    })
                    .collect()
            };
            Ok(AlertRule {
                rule_id: rule.name.clone(),
                expr,
                for_duration: Duration::from_secs(rule.for_secs),
                severity: rule.severity,
                labels: rule.labels.clone(),
                channels,
            })
        })
        .collect()
}
