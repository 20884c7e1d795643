use crate::api::routes;
use crate::generator::DetectionGenerator;
use crate::repository::{Repository, SYSTEM_ACTOR};
use crate::workflow::config::BackendConfig;
use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use minewatchcore::model::Status;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Owns the repository and drives seeding, the live emitter and the HTTP
/// service.
#[derive(Clone)]
pub struct Runner {
    config: BackendConfig,
    repo: Arc<Repository>,
}

impl Runner {
    pub fn new(config: BackendConfig) -> Self {
        let repo = Arc::new(Repository::new(config.change_buffer));
        Self { config, repo }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Inserts the generator's history window, oldest first, and triages a
    /// share of it so the dashboard starts with mixed statuses.
    pub fn seed(&self, generator: &mut DetectionGenerator, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let history = generator.history(now);
        let count = history.len();
        for new in history {
            let detection = self
                .repo
                .insert(new)
                .context("inserting seeded detection")?;
            let status = generator.triage();
            if status != Status::UnderReview {
                self.repo
                    .update_status(&detection.id, status, SYSTEM_ACTOR)
                    .with_context(|| format!("triaging {}", detection.id))?;
            }
        }
        info!("seeded {} detections", count);
        Ok(count)
    }

    /// Inserts one generated detection per `period`, starting one period from now.
    pub fn spawn_emitter(&self, mut generator: DetectionGenerator, period: Duration) -> JoinHandle<()> {
        let repo = Arc::clone(&self.repo);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match repo.insert(generator.next_at(Utc::now())) {
                    Ok(detection) => debug!(
                        "emitted {} ({}) at {}",
                        detection.id, detection.method, detection.location
                    ),
                    Err(err) => warn!("emitter insert failed: {}", err),
                }
            }
        })
    }

    /// Serves the API until `shutdown` resolves. Open change feeds are closed
    /// first so the graceful shutdown does not wait on them.
    pub async fn serve<F>(&self, generator: DetectionGenerator, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        let signal = async move {
            shutdown.await;
            info!("shutting down detection service");
            repo.close_changes();
        };
        let (addr, server) = warp::serve(routes(Arc::clone(&self.repo), self.config.api_settings()))
            .try_bind_with_graceful_shutdown(self.config.bind, signal)
            .with_context(|| format!("binding detection service to {}", self.config.bind))?;
        info!("detection service listening on http://{}", addr);

        let emitter = self.config.emit_interval().map(|period| {
            info!("emitting a detection every {:?}", period);
            self.spawn_emitter(generator, period)
        });
        server.await;
        if let Some(emitter) = emitter {
            emitter.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorConfig;
    use minewatchcore::model::ChangeKind;

    fn generator(count: usize) -> DetectionGenerator {
        DetectionGenerator::new(GeneratorConfig {
            seed: 3,
            count,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn seed_inserts_history_with_mixed_statuses() {
        let runner = Runner::new(BackendConfig::default());
        let now = Utc::now();
        let seeded = runner.seed(&mut generator(80), now).unwrap();
        assert_eq!(seeded, 80);

        let repo = runner.repository();
        let stats = repo.stats(now);
        assert_eq!(stats.all_time.total, 80);
        assert!(stats.all_time.statuses.pending > 0);
        assert!(stats.all_time.statuses.confirmed + stats.all_time.statuses.rejected > 0);
        assert!(stats.last_7_days.total < stats.all_time.total);

        let newest = &repo.list(1)[0];
        assert_eq!(newest.id, "det-000080");
    }

    #[tokio::test(start_paused = true)]
    async fn emitter_inserts_one_detection_per_period() {
        let runner = Runner::new(BackendConfig::default());
        let mut changes = runner.repository().subscribe();
        let emitter = runner.spawn_emitter(generator(0), Duration::from_secs(5));

        time::sleep(Duration::from_secs(4)).await;
        assert!(runner.repository().is_empty());

        time::sleep(Duration::from_secs(7)).await;
        assert_eq!(runner.repository().len(), 2);
        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Insert);

        emitter.abort();
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let config = BackendConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let runner = Runner::new(config);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn({
            let runner = runner.clone();
            async move {
                runner
                    .serve(generator(0), async {
                        let _ = rx.await;
                    })
                    .await
            }
        });
        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(runner.repository().subscriber_count(), 0);
    }
}
