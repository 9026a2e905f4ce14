use anyhow::Result;
use pv_surplus_scheduler::{config::Config, telemetry};
use telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    info!(
        loads = cfg.loads.len(),
        cycle_seconds = cfg.scheduler.cycle_seconds,
        "starting PV surplus scheduler"
    );

    #[cfg(feature = "sim")]
    {
        run_sim(cfg).await?;
    }

    #[cfg(not(feature = "sim"))]
    anyhow::bail!("no hardware backend compiled in; enable the 'sim' feature");

    #[cfg(feature = "sim")]
    Ok(())
}

#[cfg(feature = "sim")]
async fn run_sim(cfg: Config) -> Result<()> {
    use pv_surplus_scheduler::controller::{Scheduler, SchedulerSettings};
    use pv_surplus_scheduler::domain::SignalSource;
    use pv_surplus_scheduler::hardware::{build_sim_bank, spawn_surplus_feed};
    use pv_surplus_scheduler::repo::JsonStateStore;
    use pv_surplus_scheduler::utils::SystemClock;
    use std::sync::Arc;
    use std::time::Duration;

    let bank = build_sim_bank(&cfg);
    spawn_surplus_feed(bank.surplus.clone(), Duration::from_secs(5));
    let surplus: Arc<dyn SignalSource> = bank.surplus.clone();

    let store = Arc::new(JsonStateStore::open(&cfg.store.path).await?);
    let scheduler = Scheduler::new(
        SchedulerSettings::from_config(&cfg),
        bank.loads,
        surplus,
        store,
        Arc::new(SystemClock),
    )
    .await?;

    let handle = scheduler.handle();
    tokio::spawn(scheduler.run());

    // Log each published snapshot so the demo is observable without a UI.
    let mut results = handle.subscribe();
    tokio::spawn(async move {
        while results.changed().await.is_ok() {
            let snapshot = results.borrow_and_update().clone();
            if let Some(result) = snapshot {
                info!(
                    surplus_avg_w = result.surplus_avg_w,
                    real_budget_w = result.real_budget_w,
                    on = ?result.real_ideal_on,
                    "published cycle result"
                );
            }
        }
    });

    telemetry::shutdown_signal().await;
    Ok(())
}
