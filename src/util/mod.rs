//! Internal utilities.

pub(crate) mod det_rng;

pub(crate) use det_rng::DetRng;
