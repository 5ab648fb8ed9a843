//! Migration path for jobs that predate tracking records.
//!
//! A job without a tracking record whose previous build declared properties
//! had every one of its properties written by that declaration, so all of them
//! may be replaced. Jobs whose previous build did not declare properties keep
//! what an administrator configured.

use crate::job::{BuildNumber, Job};

/// Name of the step recorded when a build declares properties.
pub const PROPERTIES_STEP: &str = "properties";

/// Whether the completed build preceding `current` declared properties.
#[must_use]
pub fn previous_build_declared_properties(job: &Job, current: BuildNumber) -> bool {
    job.previous_completed_build(current)
        .is_some_and(|build| build.ran_step(PROPERTIES_STEP))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BuildRecord, BuildResult, JobConfig, JobType};

    #[test]
    fn only_the_immediately_preceding_build_counts() {
        let job = Job::new("master", JobType::Standalone, JobConfig::default());
        job.record_build(
            BuildRecord::finished(BuildNumber::new(1), BuildResult::Success)
                .with_steps([PROPERTIES_STEP.to_string()]),
        );
        assert!(previous_build_declared_properties(&job, BuildNumber::new(2)));

        job.record_build(BuildRecord::finished(BuildNumber::new(2), BuildResult::Success));
        assert!(!previous_build_declared_properties(&job, BuildNumber::new(3)));
        assert!(!previous_build_declared_properties(&job, BuildNumber::new(1)));
    }
}
