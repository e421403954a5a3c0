// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{collections::HashMap, env};
use stepwise_metadata::BuildMetadata;

/// The environment variables stepwise reads build metadata from.
pub const BUILD_ENV_VARS: &[&str] = &[
    "BUILD_URL",
    "JENKINS_URL",
    "GIT_URL",
    "GIT_BRANCH",
    "GIT_COMMIT",
    "STEPWISE_USER",
    "USER",
    "USERNAME",
];

/// Build information from the environment of a CI job.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildEnv {
    /// The URL of the build, as reported by the CI server.
    pub build_url: Option<String>,

    /// The URL of the CI server.
    pub ci_url: Option<String>,

    /// The URL of the repository under test.
    pub code_base: Option<String>,

    /// The branch under test.
    pub branch: Option<String>,

    /// The commit under test.
    pub commit: Option<String>,

    /// The user running the tests.
    pub user: Option<String>,
}

impl BuildEnv {
    /// Reads the build environment of the current process.
    pub fn from_env() -> Self {
        Self::from_vars(
            BUILD_ENV_VARS
                .iter()
                .filter_map(|&name| env::var(name).ok().map(|value| (name, value))),
        )
    }

    /// Reads the build environment from a list of variables. Empty values count as unset.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(name, value)| (name.as_ref().to_owned(), value.into()))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        let user = vars
            .remove("STEPWISE_USER")
            .or_else(|| vars.remove("USER"))
            .or_else(|| vars.remove("USERNAME"));
        Self {
            build_url: vars.remove("BUILD_URL"),
            ci_url: vars.remove("JENKINS_URL"),
            code_base: vars.remove("GIT_URL"),
            branch: vars.remove("GIT_BRANCH"),
            commit: vars.remove("GIT_COMMIT"),
            user,
        }
    }

    /// Returns true if the build URL points at the CI server.
    pub fn is_ci_build(&self) -> bool {
        match (&self.build_url, &self.ci_url) {
            (Some(build_url), Some(ci_url)) => build_url.starts_with(ci_url.as_str()),
            _ => false,
        }
    }

    /// Returns the metadata written into reports.
    pub fn metadata(&self) -> BuildMetadata {
        let build_url = self.build_url.as_deref().map(|build_url| {
            if self.is_ci_build() {
                job_url(build_url)
            } else {
                build_url.to_owned()
            }
        });
        BuildMetadata {
            user: self.user.clone(),
            build_url,
            code_base: self.code_base.as_deref().map(normalize_code_base),
            branch: self.branch.clone(),
            commit: self.commit.clone(),
        }
    }
}

/// Truncates a build URL to the job it belongs to: the first five `/`-separated segments.
///
/// `https://ci.example.com/job/nightly/42/console` becomes `https://ci.example.com/job/nightly`.
fn job_url(build_url: &str) -> String {
    build_url.split('/').take(5).collect::<Vec<_>>().join("/")
}

/// Turns an scp-style remote (`git@host:org/repo.git`) into a browsable URL
/// (`https://host/org/repo`). Other URLs are returned unchanged.
fn normalize_code_base(code_base: &str) -> String {
    match code_base.strip_prefix("git@") {
        Some(rest) => {
            let rest = rest.replacen(':', "/", 1);
            let rest = rest.strip_suffix(".git").unwrap_or(&rest);
            format!("https://{rest}")
        }
        None => code_base.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(
        "https://ci.example.com/job/nightly/42/console",
        "https://ci.example.com/job/nightly"
        ; "build page"
    )]
    #[test_case("https://ci.example.com/job", "https://ci.example.com/job"; "short url")]
    fn job_url_truncation(input: &str, expected: &str) {
        assert_eq!(job_url(input), expected);
    }

    #[test_case("git@github.com:org/repo.git", "https://github.com/org/repo"; "scp style")]
    #[test_case("git@host:repo", "https://host/repo"; "no suffix")]
    #[test_case("https://github.com/org/repo.git", "https://github.com/org/repo.git"; "https unchanged")]
    fn code_base_normalization(input: &str, expected: &str) {
        assert_eq!(normalize_code_base(input), expected);
    }

    #[test]
    fn ci_build_metadata() {
        let env = BuildEnv::from_vars([
            ("BUILD_URL", "https://ci.example.com/job/nightly/42/"),
            ("JENKINS_URL", "https://ci.example.com/"),
            ("GIT_URL", "git@github.com:org/repo.git"),
            ("GIT_BRANCH", "origin/master"),
            ("GIT_COMMIT", "abc123"),
            ("USER", "jenkins"),
            ("USERNAME", "ignored"),
        ]);
        assert!(env.is_ci_build());
        assert_eq!(
            env.metadata(),
            BuildMetadata {
                user: Some("jenkins".to_owned()),
                build_url: Some("https://ci.example.com/job/nightly".to_owned()),
                code_base: Some("https://github.com/org/repo".to_owned()),
                branch: Some("origin/master".to_owned()),
                commit: Some("abc123".to_owned()),
            }
        );
    }

    #[test]
    fn local_build_metadata() {
        let env = BuildEnv::from_vars([
            ("BUILD_URL", "https://elsewhere.example.com/a/b/c/d/e"),
            ("JENKINS_URL", "https://ci.example.com/"),
            ("STEPWISE_USER", "alex"),
            ("USER", "root"),
            ("GIT_BRANCH", ""),
        ]);
        assert!(!env.is_ci_build());
        let metadata = env.metadata();
        // Build URLs outside the CI server are kept whole.
        assert_eq!(
            metadata.build_url.as_deref(),
            Some("https://elsewhere.example.com/a/b/c/d/e")
        );
        assert_eq!(metadata.user.as_deref(), Some("alex"));
        assert_eq!(metadata.branch, None);
    }
}
