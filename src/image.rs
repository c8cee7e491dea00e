use std::io::Write;

use stacked_errors::{Result, StackableErr};
use tracing::info;

use crate::{
    config::{NYCDB_BRANCH, NYCDB_REPO},
    BuddyError, BuildOutcome, Command, ContainerRuntime, Tarball,
};

/// Which nyc-db sources an image is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArgs {
    pub repo: String,
    pub rev: String,
}

impl BuildArgs {
    pub fn new(repo: impl ToString, rev: impl ToString) -> Self {
        Self {
            repo: repo.to_string(),
            rev: rev.to_string(),
        }
    }

    /// For display only
    pub fn short_rev(&self) -> &str {
        match self.rev.char_indices().nth(10) {
            Some((i, _)) => &self.rev[..i],
            None => &self.rev,
        }
    }

    /// Uses the head of the default branch of `repo`
    pub async fn latest(repo: impl ToString) -> Result<Self> {
        let repo = repo.to_string();
        let rev = get_latest_rev(&repo, NYCDB_BRANCH).await.stack()?;
        Ok(Self { repo, rev })
    }

    pub fn dockerfile(&self) -> String {
        let Self { repo, rev } = self;
        format!(
            r#"FROM python:3.6

RUN apt-get update \
  && apt-get install -y \
    unzip \
    postgresql-client \
  && rm -rf /var/lib/apt/lists/* \
  && rm -rf /src/*.deb

ENV NYCDB_REPO={repo}
ENV NYCDB_REV={rev}

RUN curl -L ${{NYCDB_REPO}}/archive/${{NYCDB_REV}}.zip > nyc-db.zip \
  && unzip nyc-db.zip \
  && rm nyc-db.zip \
  && mv nyc-db-${{NYCDB_REV}} nyc-db \
  && cd nyc-db/src \
  && pip install -e .

# nyc-db depends on the deprecated `psycopg2` which logs warnings about using
# `psycopg2-binary` instead
RUN pip install psycopg2-binary
"#
        )
    }

    /// A build context containing only the generated `Dockerfile`
    pub fn build_context(&self) -> Result<Vec<u8>> {
        let mut tarball = Tarball::default();
        tarball
            .append_file_bytes("Dockerfile", 0o644, self.dockerfile().as_bytes())
            .stack()?;
        tarball.into_tarball().stack()
    }
}

/// Parses the output of `git ls-remote <repo> <branch>`, the first field of
/// the first line is the commit hash
pub fn parse_ls_remote(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .next()
        .map(ToOwned::to_owned)
}

pub async fn get_latest_rev(repo: &str, branch: &str) -> Result<String> {
    let resolution_err = |reason: String| BuddyError::RevisionResolution {
        repo: repo.to_owned(),
        reason,
    };
    let comres = Command::new("git ls-remote")
        .arg(repo)
        .arg(branch)
        .run_to_completion()
        .await
        .stack()?;
    if !comres.successful() {
        return Err(resolution_err(comres.stderr_as_utf8_lossy().trim().to_owned())).stack()
    }
    parse_ls_remote(&comres.stdout_as_utf8_lossy())
        .ok_or_else(|| resolution_err(format!("no reference named \"{branch}\"")))
        .stack()
}

/// Writes the build log framed so that it is easy to find in a terminal
pub fn show_build_log(log: &[String], out: &mut impl Write) -> Result<()> {
    out.write_all(b"-- BEGIN BUILD LOG --\n\n").stack()?;
    for line in log {
        out.write_all(line.as_bytes()).stack()?;
    }
    out.write_all(b"\n\n-- END BUILD LOG --\n\n").stack()?;
    Ok(())
}

/// Builds the nyc-db image and tags it with `tag`, returning the short image
/// id. If `build_args` is `None`, the latest revision of the upstream repo is
/// used. When the build fails the whole build log is written to `log_out`.
pub async fn build(
    runtime: &impl ContainerRuntime,
    tag: &str,
    build_args: Option<BuildArgs>,
    log_out: &mut impl Write,
) -> Result<String> {
    let build_args = match build_args {
        Some(build_args) => build_args,
        None => BuildArgs::latest(NYCDB_REPO).await.stack()?,
    };
    let context = build_args.build_context().stack()?;
    info!(
        "Building image for {}@{}...",
        build_args.repo,
        build_args.short_rev()
    );
    match runtime.build_image(tag, context).await.stack()? {
        BuildOutcome::Built(image) => {
            let image_id = image.short_id();
            info!(
                "Built image {image_id} with tags {}.",
                image.tags.join(", ")
            );
            Ok(image_id)
        }
        BuildOutcome::Failed { message, log } => {
            log_out
                .write_all(b"Something bad happened. Here is the build log:\n\n")
                .stack()?;
            show_build_log(&log, log_out).stack()?;
            Err(BuddyError::BuildFailed {
                tag: tag.to_owned(),
                message,
            })
            .stack()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeRuntime;

    fn args() -> BuildArgs {
        BuildArgs::new(NYCDB_REPO, "0123456789abcdef0123456789abcdef01234567")
    }

    #[test]
    fn short_rev() {
        assert_eq!(args().short_rev(), "0123456789");
        assert_eq!(BuildArgs::new(NYCDB_REPO, "abc").short_rev(), "abc");
    }

    #[test]
    fn dockerfile_is_parameterized() {
        let dockerfile = args().dockerfile();
        assert!(dockerfile.starts_with("FROM python:3.6\n"));
        assert!(dockerfile.contains("ENV NYCDB_REPO=https://github.com/aepyornis/nyc-db\n"));
        assert!(dockerfile.contains("ENV NYCDB_REV=0123456789abcdef0123456789abcdef01234567\n"));
        // the braces of shell variables survive formatting
        assert!(dockerfile.contains("${NYCDB_REPO}/archive/${NYCDB_REV}.zip"));
    }

    #[test]
    fn ls_remote() {
        assert_eq!(
            parse_ls_remote("9f2c1d\trefs/heads/master\n").as_deref(),
            Some("9f2c1d")
        );
        assert_eq!(parse_ls_remote(""), None);
        assert_eq!(parse_ls_remote("  \n"), None);
    }

    #[tokio::test]
    async fn build_tags_image() {
        let runtime = FakeRuntime::new();
        let mut log = Vec::new();
        let image_id = build(&runtime, "nycdbuddy", Some(args()), &mut log)
            .await
            .unwrap();
        assert!(log.is_empty());
        let image = runtime.image("nycdbuddy").unwrap();
        assert_eq!(image.short_id(), image_id);
        assert!(image.tags.contains(&"nycdbuddy:latest".to_owned()));
        // the context had exactly the generated dockerfile
        let context = runtime.last_build_context().unwrap();
        let mut archive = tar::Archive::new(std::io::Cursor::new(context));
        let paths = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().display().to_string())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["Dockerfile".to_owned()]);
    }

    #[tokio::test]
    async fn build_failure_surfaces_whole_log() {
        let runtime = FakeRuntime::new();
        let lines = vec![
            "Step 1/5 : FROM python:3.6\n".to_owned(),
            " ---> abcdef\n".to_owned(),
            "Step 2/5 : RUN apt-get update\n".to_owned(),
            "E: something broke\n".to_owned(),
        ];
        runtime.fail_next_build("returned a non-zero code: 100", lines.clone());
        let mut log = Vec::new();
        let err = build(&runtime, "nycdbuddy", Some(args()), &mut log)
            .await
            .unwrap_err();
        assert!(format!("{err:?}{err}").to_lowercase().contains("build"));
        assert!(runtime.image("nycdbuddy").is_none());

        let log = String::from_utf8(log).unwrap();
        assert!(log.starts_with("Something bad happened. Here is the build log:\n\n"));
        let expected = format!(
            "-- BEGIN BUILD LOG --\n\n{}\n\n-- END BUILD LOG --\n\n",
            lines.concat()
        );
        assert!(log.ends_with(&expected));
    }
}
