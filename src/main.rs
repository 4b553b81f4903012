//! Track the sessions of the users of a simulated online shop.
//!
//! Every source generates a stream of product events: a user opening the listing of a product or
//! buying it. A session ends after `session-gap` milliseconds without events of its user, and it
//! is summarized by the number of viewed listings and the set of purchased products.
//!
//! ```text
//! sessionflow --session-gap 5000 --allowed-lateness 100 --watermark-min-step 100 \
//!     --idle-timeout 30000 -p 4 -s 2 [EVENTS_PER_SOURCE]
//! ```

#[macro_use]
extern crate log;

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use nanorand::{Rng, WyRand};

use sessionflow::operator::{KeyerFn, SessionError};
use sessionflow::prelude::*;
use sessionflow::SourceHandle;

const USERS: u32 = 500;
const PRODUCTS: u32 = 100;
const DEFAULT_EVENTS: u64 = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ProductEventType {
    ViewListing,
    Purchase,
}

#[derive(Clone, Debug)]
struct ProductEvent {
    user_id: String,
    timestamp: Timestamp,
    event_type: ProductEventType,
    product_id: String,
}

type Session = WindowResult<String, (i64, BTreeSet<String>)>;

fn main() -> Result<(), SessionError> {
    env_logger::init();

    let (config, args) = SessionConfig::from_args()?;
    let events = match args.first() {
        Some(n) => n.parse().unwrap_or_else(|_| {
            warn!("invalid number of events: {n}, using {DEFAULT_EVENTS}");
            DEFAULT_EVENTS
        }),
        None => DEFAULT_EVENTS,
    };
    let disorder = config.allowed_lateness;

    let env = StreamEnvironment::new(config);
    let mut job = env.session_windows(
        |e: &ProductEvent| e.user_id.clone(),
        |e: &ProductEvent| Some(e.timestamp),
        AllOf::new((
            CountWhere::new(|e: &ProductEvent| e.event_type == ProductEventType::ViewListing),
            ToSet::new(|e: &ProductEvent| {
                (e.event_type == ProductEventType::Purchase).then(|| e.product_id.clone())
            }),
        )),
    )?;

    let results = job.results();
    let sink = std::thread::Builder::new()
        .name("sink".into())
        .spawn(move || {
            let mut count = 0u64;
            for session in results.iter() {
                info!("{}", session_to_string(&session));
                count += 1;
            }
            count
        })?;

    let start = now_millis();
    std::thread::scope(|scope| {
        for (i, source) in job.sources().into_iter().enumerate() {
            scope.spawn(move || {
                if let Err(e) = generate_events(source, events, start, disorder, i as u64) {
                    error!("source {i} stopped: {e}");
                }
            });
        }
    });

    let metrics = job.join()?;
    let sessions = sink.join().unwrap_or_default();
    info!("{sessions} sessions closed");
    println!("{}", metrics.to_json());
    Ok(())
}

/// Generate `events` product events, starting from `start` with a few milliseconds between each
/// other. Some events are delayed by at most `disorder` milliseconds.
///
/// The events of a stopped partition are skipped, the other users are still tracked.
fn generate_events<IndexFn, TsFn>(
    source: SourceHandle<ProductEvent, IndexFn, TsFn>,
    events: u64,
    start: Timestamp,
    disorder: Timestamp,
    seed: u64,
) -> Result<(), SessionError>
where
    IndexFn: KeyerFn<u64, ProductEvent>,
    TsFn: KeyerFn<Option<Timestamp>, ProductEvent>,
{
    let mut rng = WyRand::new_seed(seed);
    let mut clock = start;
    for _ in 0..events {
        clock += rng.generate_range(0..20u64) as Timestamp;
        let delay = if disorder > 0 && rng.generate_range(0..10u32) == 0 {
            rng.generate_range(0..=disorder as u64) as Timestamp
        } else {
            0
        };
        let event_type = if rng.generate_range(0..10u32) == 0 {
            ProductEventType::Purchase
        } else {
            ProductEventType::ViewListing
        };
        let event = ProductEvent {
            user_id: format!("user-{:03}", rng.generate_range(0..USERS)),
            timestamp: clock - delay,
            event_type,
            product_id: format!("product-{}", rng.generate_range(0..PRODUCTS)),
        };
        match source.send(event) {
            Err(SessionError::Disconnected(partition)) => {
                trace!("partition {partition} stopped, event skipped")
            }
            res => res?,
        }
    }
    source.finish();
    Ok(())
}

fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

fn session_to_string(s: &Session) -> String {
    let (viewed, purchases) = &s.value;
    format!(
        "Session{{userId={}, start={}, duration={:2}s, value={{viewed={:2}, purchases={:?}}}}}",
        s.key,
        time_of_day(s.start),
        s.duration() / 1000,
        viewed,
        purchases
    )
}

/// Format a timestamp as the UTC time of the day.
fn time_of_day(ts: Timestamp) -> String {
    let ms = ts.rem_euclid(86_400_000);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        ms / 60_000 % 60,
        ms / 1000 % 60,
        ms % 1000
    )
}
