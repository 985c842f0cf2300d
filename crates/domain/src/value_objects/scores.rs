//! Clamped score newtypes.
//!
//! Every score the engine computes or receives from a classifier lives in
//! [0.0, 1.0]. The newtypes clamp on construction so out-of-range values from
//! external backends can never leak into tie-break comparisons.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_score {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
        pub struct $name(f64);

        impl $name {
            pub fn new(value: f64) -> Self {
                Self(value.clamp(0.0, 1.0))
            }

            pub fn value(&self) -> f64 {
                self.0
            }

            pub const ZERO: $name = $name(0.0);
            pub const MAX: $name = $name(1.0);
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.3}", self.0)
            }
        }

        impl From<f64> for $name {
            fn from(value: f64) -> Self {
                Self::new(value)
            }
        }
    };
}

define_score!(SafetyScore, "How safe a content unit is (1.0 = fully safe)");
define_score!(
    AlignmentScore,
    "How well a choice aligns with the scene's therapeutic focus"
);
define_score!(Confidence, "Classifier confidence in its own verdict");
