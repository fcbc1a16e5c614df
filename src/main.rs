use std::env;
use std::sync::Arc;

use chrono::NaiveTime;
use evlog::{LogEventConsolePrinter, Logger};

use matchday_bot::config::{ConfigTable, VenueConfig};
use matchday_bot::db::dbclient::DBClient;
use matchday_bot::db::pg::{PgNicknameStore, PgPollStore, PgVoteStore};
use matchday_bot::engine::Engine;
use matchday_bot::runtime::{get_logger, set_logger};

fn venue_config_from_env(venue_id: i64) -> VenueConfig {
    let mut config = VenueConfig::defaults(venue_id);

    if let Ok(v) = env::var("MATCHDAY_MIN_PLAYERS") {
        config.min_players = v.parse().expect("MATCHDAY_MIN_PLAYERS is invalid");
    }
    if let Ok(v) = env::var("MATCHDAY_FIRST_TIME") {
        config.first_time =
            NaiveTime::parse_from_str(&v, "%H:%M").expect("MATCHDAY_FIRST_TIME is invalid");
    }
    if let Ok(v) = env::var("MATCHDAY_SECOND_TIME") {
        config.second_time =
            NaiveTime::parse_from_str(&v, "%H:%M").expect("MATCHDAY_SECOND_TIME is invalid");
    }
    if let Ok(v) = env::var("MATCHDAY_UTC_OFFSET") {
        config.utc_offset_hours = v.parse().expect("MATCHDAY_UTC_OFFSET is invalid");
    }
    if let Ok(v) = env::var("MATCHDAY_AUTO_PIN") {
        config.auto_pin = v.parse().expect("MATCHDAY_AUTO_PIN is invalid");
    }
    if let Ok(v) = env::var("MATCHDAY_ADMINS") {
        config.admins = v
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().parse().expect("MATCHDAY_ADMINS entry is invalid"))
            .collect();
    }

    config
}

/// One-shot status dump for the configured venue: the active poll, its
/// current votes, and the quorum decision.
async fn status(engine: &Engine, venue_id: i64) {
    let poll = match engine.active_poll(venue_id).await {
        Ok(Some(v)) => v,
        Ok(None) => {
            println!("no active poll for venue {}", venue_id);
            return;
        }
        Err(e) => {
            let e = anyhow::Error::new(e);
            get_logger().error_with_err("Failed to look up active poll.", &*e, None);
            return;
        }
    };

    println!("poll {} for {} (pinned: {})", poll.id, poll.event_date, poll.pinned);

    let current = match engine.current_votes(poll.id).await {
        Ok(v) => v,
        Err(e) => {
            let e = anyhow::Error::new(e);
            get_logger().error_with_err("Failed to read current votes.", &*e, None);
            return;
        }
    };

    for vote in &current {
        println!(
            "{:>20} {:?}{}",
            vote.display_name,
            vote.option,
            if vote.manual { " (manual)" } else { "" },
        );
    }

    match engine.quorum_for_venue(venue_id).await {
        Ok(report) => match report.start_time {
            Some(time) => println!(
                "quorum met: start {} with {} playing, {} arriving later",
                time,
                report.decision.playing.len(),
                report.decision.arriving_later.len(),
            ),
            None => println!("quorum not met"),
        },
        Err(e) => {
            let e = anyhow::Error::new(e);
            get_logger().error_with_err("Failed to compute quorum.", &*e, None);
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let db_url = env::var("MATCHDAY_DATABASE_URL").expect("expected MATCHDAY_DATABASE_URL");
    let venue_id: i64 = env::var("MATCHDAY_VENUE")
        .expect("expected MATCHDAY_VENUE")
        .parse()
        .expect("venue ID is invalid");

    let mut logger = Logger::default();
    logger.register(LogEventConsolePrinter::default());
    set_logger(logger);

    let db_client = DBClient::new(&db_url)
        .await
        .expect("failed to connect to database");

    let pool = db_client.conn().clone();
    let engine = Engine::new(
        Arc::new(PgPollStore::new(pool.clone())),
        Arc::new(PgVoteStore::new(pool.clone())),
        Arc::new(PgNicknameStore::new(pool)),
        ConfigTable::new(vec![venue_config_from_env(venue_id)]),
    );

    status(&engine, venue_id).await;
}
