use std::collections::BTreeSet;

use stacked_errors::{Result, StackableErr};

/// An in-memory tarball, used as the build context sent to the docker API
pub struct Tarball {
    tar: tar::Builder<Vec<u8>>,
    paths: BTreeSet<String>,
}

impl Default for Tarball {
    /// An empty tarball
    fn default() -> Self {
        Self {
            tar: tar::Builder::new(Vec::new()),
            paths: Default::default(),
        }
    }
}

// avoid the `tar::Builder`s
impl std::fmt::Debug for Tarball {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tarball {{ {} }}",
            self.paths
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\n")
        )
    }
}

impl Tarball {
    /// Append a file that will go to the given `path`, with `mode` and the
    /// bytes of the `content` of the file
    pub fn append_file_bytes(
        &mut self,
        path: impl ToString,
        mode: u32,
        content: &[u8],
    ) -> Result<()> {
        let path = path.to_string();
        let header = &mut tar::Header::new_gnu();
        header.set_size(content.len() as _);
        header.set_mode(mode);
        header.set_cksum();
        self.tar
            .append_data(header, &path, content)
            .stack_err_with(|| format!("Tarball::append_file_bytes(path: {path})"))?;
        self.paths.insert(path);
        Ok(())
    }

    /// Get the bytes of a tarball
    pub fn into_tarball(self) -> Result<Vec<u8>> {
        self.tar.into_inner().stack()
    }
}
