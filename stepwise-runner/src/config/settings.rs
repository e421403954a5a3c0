// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{BuildEnv, DEFAULT_STEP_TIMEOUT, ReportConfig, StepwiseConfig};
use smol_str::SmolStr;
use std::{fmt, time::Duration};
use stepwise_metadata::BuildMetadata;
use tracing::warn;

/// Why reporting to the backend is disabled for a run.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DisabledReason {
    /// Reporting was not enabled in the config or on the command line.
    NotEnabled,

    /// Reporting is restricted to another user.
    RestrictedUser {
        /// The user reporting is restricted to.
        allowed: String,

        /// The current user, if known.
        actual: Option<String>,
    },

    /// A CI build is running on a branch other than the main branch.
    NonMainBranch {
        /// The main branch.
        main_branch: String,

        /// The branch under test, if known.
        branch: Option<String>,
    },
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnabled => write!(f, "reporting is not enabled"),
            Self::RestrictedUser { allowed, actual } => write!(
                f,
                "reporting is restricted to user `{allowed}`, but tests are running as `{}`",
                actual.as_deref().unwrap_or("unknown"),
            ),
            Self::NonMainBranch {
                main_branch,
                branch,
            } => write!(
                f,
                "CI build is on branch `{}`, but only `{main_branch}` is reported",
                branch.as_deref().unwrap_or("unknown"),
            ),
        }
    }
}

/// The resolved settings a [`TestLifecycle`](crate::lifecycle::TestLifecycle) runs with.
#[derive(Clone, Debug)]
pub struct ReportSettings {
    default_step_timeout: Duration,
    worker: Option<SmolStr>,
    build: BuildMetadata,
    disabled_reasons: Vec<DisabledReason>,
}

impl ReportSettings {
    /// Resolves settings from the config and the build environment.
    ///
    /// `enable_override` replaces the config's `enabled` switch if set. Policy restrictions apply
    /// either way.
    pub fn resolve(
        config: &StepwiseConfig,
        env: &BuildEnv,
        enable_override: Option<bool>,
    ) -> Self {
        let report = &config.report;
        let disabled_reasons = disabled_reasons(report, env, enable_override);
        for reason in &disabled_reasons {
            if *reason != DisabledReason::NotEnabled {
                warn!("not reporting test results: {reason}");
            }
        }

        Self {
            default_step_timeout: report.step_timeout,
            worker: report.worker.clone(),
            build: env.metadata(),
            disabled_reasons,
        }
    }

    /// Settings for a local run: reporting disabled, default timeouts, no build metadata.
    pub fn local() -> Self {
        Self {
            default_step_timeout: DEFAULT_STEP_TIMEOUT,
            worker: None,
            build: BuildMetadata::default(),
            disabled_reasons: vec![DisabledReason::NotEnabled],
        }
    }

    /// Forces reporting on or off, ignoring policy.
    pub fn with_reporting(mut self, enabled: bool) -> Self {
        self.disabled_reasons = if enabled {
            Vec::new()
        } else {
            vec![DisabledReason::NotEnabled]
        };
        self
    }

    /// Sets the default step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = timeout;
        self
    }

    /// Sets the worker name.
    pub fn with_worker(mut self, worker: impl Into<SmolStr>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Returns true if finished tests are reported to the backend.
    pub fn reporting_enabled(&self) -> bool {
        self.disabled_reasons.is_empty()
    }

    /// Returns the reasons reporting is disabled, if it is.
    pub fn disabled_reasons(&self) -> &[DisabledReason] {
        &self.disabled_reasons
    }

    /// Returns the timeout for steps that don't specify one.
    pub fn default_step_timeout(&self) -> Duration {
        self.default_step_timeout
    }

    /// Returns the worker name, if set.
    pub fn worker(&self) -> Option<&SmolStr> {
        self.worker.as_ref()
    }

    /// Returns the build metadata.
    pub fn build(&self) -> &BuildMetadata {
        &self.build
    }
}

fn disabled_reasons(
    report: &ReportConfig,
    env: &BuildEnv,
    enable_override: Option<bool>,
) -> Vec<DisabledReason> {
    let mut reasons = Vec::new();
    if !enable_override.unwrap_or(report.enabled) {
        reasons.push(DisabledReason::NotEnabled);
    }
    if let Some(allowed) = &report.restrict_user
        && env.user.as_ref() != Some(allowed)
    {
        reasons.push(DisabledReason::RestrictedUser {
            allowed: allowed.clone(),
            actual: env.user.clone(),
        });
    }
    if let Some(main_branch) = &report.main_branch
        && env.is_ci_build()
        && env.branch.as_ref() != Some(main_branch)
    {
        reasons.push(DisabledReason::NonMainBranch {
            main_branch: main_branch.clone(),
            branch: env.branch.clone(),
        });
    }
    reasons
}
