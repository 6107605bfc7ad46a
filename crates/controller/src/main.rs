mod config;
mod controller;
mod interlock;
mod pump;
mod sensor;
mod state;
mod web;

use anyhow::Result;
use std::{env, sync::Arc, time::Duration};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use controller::Controller;
use pump::PumpRelay;
use sensor::SensorReader;
use state::Clock;
use web::{App, WebState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let pump_pin: u8 = env::var("PUMP_GPIO_PIN")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(17);

    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    // ── Config file ─────────────────────────────────────────────────
    let cfg = config::load(&config_path)?;
    info!(?cfg, "config loaded");

    // ── Pump relay (fail-safe: off at construction) ─────────────────
    let pump = PumpRelay::new(pump_pin, active_low)?;

    // ── Sensor backend ──────────────────────────────────────────────
    #[cfg(feature = "sim")]
    let mut reader = {
        let scenario =
            sensor::Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
        info!(%scenario, "using simulated sensor");
        sensor::SimSensor::new(scenario)
    };
    #[cfg(not(feature = "sim"))]
    let mut reader = sensor::NoSensor;

    // ── Shared state + push channel ─────────────────────────────────
    let clock = Clock::new();
    let controller = Controller::new(cfg.clone(), clock.now_ms());
    let (push, _) = broadcast::channel(32);
    let shared = Arc::new(RwLock::new(App { controller, pump }));

    // ── Web server ──────────────────────────────────────────────────
    let web_state = WebState {
        app: Arc::clone(&shared),
        push: push.clone(),
        clock,
        config_path: config_path.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state).await {
            error!("web server exited: {e:#}");
        }
    });

    {
        let mut app = shared.write().await;
        if let Some(ev) = app.controller.set_wifi(true) {
            let _ = push.send(ev);
        }
    }

    // ── Measurement tick loop ───────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.measurement_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(
        interval_ms = cfg.measurement_interval_ms,
        "irrigation controller started"
    );

    loop {
        ticker.tick().await;
        let now = clock.now_ms();
        let poll = reader.read();

        let events = {
            let mut app = shared.write().await;
            let events = app.controller.tick(now, poll);
            app.actuate(&events);

            // Close the loop for the simulator: wet soil while watering.
            #[cfg(feature = "sim")]
            reader.set_watering(app.controller.state().pump_active);

            events
        };

        for ev in events {
            let _ = push.send(ev);
        }
    }
}
