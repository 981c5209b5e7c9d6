use crate::location::Location;

/// A fix this much newer than the best always replaces it, one this much older never does.
pub const SIGNIFICANT_TIME_DELTA_MS: i64 = 120_000;

/// Accuracy loss (meters) past which a newer fix from the same provider is still rejected
pub const SIGNIFICANT_ACCURACY_LOSS: i32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The rule that decided a comparison, in the order the rules are evaluated
pub enum Verdict {
    /// There was nothing to compare against
    NoPrevious,
    SignificantlyNewer,
    SignificantlyOlder,
    MoreAccurate,
    /// Newer and at least as accurate
    NewerNotLessAccurate,
    /// Newer, a little less accurate, but from the provider that produced the best fix
    NewerFromSameProvider,
    /// None of the accepting rules matched
    Rejected {
        time_delta: i64,
        accuracy_delta: i32,
    },
}

impl Verdict {
    pub fn is_better(self) -> bool {
        !matches!(self, Self::SignificantlyOlder | Self::Rejected { .. })
    }
}

/// Decide whether `candidate` should replace `best`, reporting which rule applied.
pub fn compare_locations(candidate: &Location, best: Option<&Location>) -> Verdict {
    let Some(best) = best else {
        return Verdict::NoPrevious;
    };

    let time_delta = candidate.timestamp() - best.timestamp();

    if time_delta > SIGNIFICANT_TIME_DELTA_MS {
        return Verdict::SignificantlyNewer;
    }

    if time_delta < -SIGNIFICANT_TIME_DELTA_MS {
        return Verdict::SignificantlyOlder;
    }

    // Truncated toward zero before comparing, so a fix 0.9m worse counts as equally accurate
    let accuracy_delta = (candidate.accuracy() - best.accuracy()) as i32;
    let is_more_accurate = accuracy_delta < 0;
    let is_less_accurate = accuracy_delta > 0;
    let is_significantly_less_accurate = accuracy_delta > SIGNIFICANT_ACCURACY_LOSS;

    let is_newer = time_delta > 0;
    let is_from_same_provider = candidate
        .provider()
        .is_some_and(|provider| Some(provider) == best.provider());

    if is_more_accurate {
        Verdict::MoreAccurate
    } else if is_newer && !is_less_accurate {
        Verdict::NewerNotLessAccurate
    } else if is_newer && !is_significantly_less_accurate && is_from_same_provider {
        Verdict::NewerFromSameProvider
    } else {
        Verdict::Rejected {
            time_delta,
            accuracy_delta,
        }
    }
}

pub fn is_better_location(candidate: &Location, best: Option<&Location>) -> bool {
    compare_locations(candidate, best).is_better()
}
