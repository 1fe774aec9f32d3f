//! Ready-made fault-injection filters.
//!
//! ```
//! use bftsim_sim::{FilterId, SimTransport, filters};
//!
//! let mut transport: SimTransport = SimTransport::new();
//! transport.add_filter(FilterId(1), filters::delay_message_type("pbft.Commit", 5));
//! transport.add_filter(FilterId(2), filters::random_drop(42, 0.1));
//! ```

use std::collections::BTreeSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{Filter, FilterInput, SimAddress};

/// Drops everything sent by `src`.
pub fn drop_from(src: SimAddress) -> impl Filter {
    move |input: &FilterInput<'_>, _: &mut u64| input.src != src
}

/// Drops everything addressed to `dst`.
pub fn drop_to(dst: SimAddress) -> impl Filter {
    move |input: &FilterInput<'_>, _: &mut u64| input.dst != dst
}

/// Drops everything sent by or addressed to `addr`.
pub fn isolate(addr: SimAddress) -> impl Filter {
    move |input: &FilterInput<'_>, _: &mut u64| input.src != addr && input.dst != addr
}

/// Drops every message whose type tag equals `msg_type`.
pub fn drop_message_type(msg_type: impl Into<String>) -> impl Filter {
    let msg_type = msg_type.into();
    move |input: &FilterInput<'_>, _: &mut u64| input.msg_type != msg_type
}

/// Adds `delay_ms` to every message whose type tag equals `msg_type`.
pub fn delay_message_type(msg_type: impl Into<String>, delay_ms: u64) -> impl Filter {
    let msg_type = msg_type.into();
    move |input: &FilterInput<'_>, delay: &mut u64| {
        if input.msg_type == msg_type {
            *delay += delay_ms;
        }
        true
    }
}

/// Drops messages crossing between `side` and every other endpoint.
pub fn partition(side: impl IntoIterator<Item = SimAddress>) -> impl Filter {
    let side: BTreeSet<SimAddress> = side.into_iter().collect();
    move |input: &FilterInput<'_>, _: &mut u64| {
        side.contains(&input.src) == side.contains(&input.dst)
    }
}

/// Drops each message independently with `probability`, reproducibly for a
/// given `seed`.
///
/// # Panics
///
/// Panics if `probability` is outside `[0, 1]`.
pub fn random_drop(seed: u64, probability: f64) -> impl Filter {
    assert!(
        (0.0..=1.0).contains(&probability),
        "drop probability {probability} outside [0, 1]"
    );
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    move |_: &FilterInput<'_>, _: &mut u64| !rng.gen_bool(probability)
}

/// Adds a uniformly random delay in `0..=max_delay_ms` to each message,
/// reproducibly for a given `seed`.
pub fn random_delay(seed: u64, max_delay_ms: u64) -> impl Filter {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    move |_: &FilterInput<'_>, delay: &mut u64| {
        *delay += rng.gen_range(0..=max_delay_ms);
        true
    }
}
