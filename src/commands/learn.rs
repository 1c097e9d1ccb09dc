//! `vigil learn` - run the learning feedback cycle

use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::learning::FeedbackController;
use crate::storage::Database;

/// Run one learning cycle, or keep cycling on an interval
pub async fn run(config: &Config, watch_secs: Option<u64>) -> Result<()> {
    let db = Database::open(&config.database.path)?;
    let controller = FeedbackController::new(&db, config.learning.clone());

    match watch_secs {
        Some(secs) => {
            println!("Running learning cycles every {secs}s (ctrl-c to stop)");
            controller.run_on_interval(Duration::from_secs(secs)).await;
            Ok(())
        }
        None => {
            let outcome = controller.run_cycle()?;
            if outcome.adjusted {
                println!(
                    "Threshold {} -> {} (accept rate {:.2}, {} events)",
                    outcome.old_threshold,
                    outcome.new_threshold,
                    outcome.accept_rate.unwrap_or_default(),
                    outcome.events_seen,
                );
            } else {
                println!("No adjustment ({} events in window)", outcome.events_seen);
            }
            Ok(())
        }
    }
}
