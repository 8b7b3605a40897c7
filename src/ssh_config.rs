use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::BurrowError;

pub const GENERATED_MARKER: &str = "# do not edit - generated by burrow";

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SshConfig {
    preamble: Vec<String>,
    blocks: Vec<HostBlock>,
    trailer: Vec<String>,
}

/// A `Host` or `Match` section. Blank lines and column-0 comments directly
/// above the header are `leading`; they travel with the section they precede.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HostBlock {
    leading: Vec<String>,
    header: String,
    lines: Vec<String>,
}

impl HostBlock {
    pub fn patterns(&self) -> Option<Vec<&str>> {
        let (keyword, rest) = split_keyword(&self.header)?;
        if !keyword.eq_ignore_ascii_case("host") {
            return None;
        }
        let rest = rest.split('#').next().unwrap_or_default();
        Some(rest.split_whitespace().collect())
    }

    fn is_host(&self, hostname: &str) -> bool {
        self.patterns()
            .is_some_and(|patterns| patterns == [hostname])
    }

    fn detach_tail(&mut self) -> Vec<String> {
        let keep = self
            .lines
            .iter()
            .rposition(|line| !is_detachable(line))
            .map_or(0, |index| index + 1);
        self.lines.split_off(keep)
    }

    fn last_line(&self) -> &str {
        self.lines.last().unwrap_or(&self.header)
    }

    fn render_into(&self, out: &mut Vec<String>) {
        out.extend(self.leading.iter().cloned());
        out.push(self.header.clone());
        out.extend(self.lines.iter().cloned());
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HostEntry {
    pub hostname: String,
    pub local_interface: String,
    pub local_port: u16,
    pub identity_file: PathBuf,
}

impl HostEntry {
    fn to_block(&self) -> HostBlock {
        let directives = [
            ("ForwardAgent", "yes".to_string()),
            ("HostName", self.local_interface.clone()),
            ("Port", self.local_port.to_string()),
            ("StrictHostKeyChecking", "no".to_string()),
            ("UserKnownHostsFile", NULL_DEVICE.to_string()),
            ("IdentityFile", quote(&self.identity_file.display().to_string())),
            ("IdentitiesOnly", "yes".to_string()),
        ];

        let mut lines = directives
            .into_iter()
            .map(|(key, value)| format!("    {key} {value}"))
            .collect::<Vec<_>>();
        lines.push(format!("    {GENERATED_MARKER}"));

        HostBlock {
            leading: Vec::new(),
            header: format!("Host {}", self.hostname),
            lines,
        }
    }
}

impl SshConfig {
    pub fn parse(raw: &str) -> Self {
        let mut config = Self::default();
        if raw.is_empty() {
            return config;
        }

        let body = raw.strip_suffix('\n').unwrap_or(raw);
        for line in body.split('\n') {
            if starts_section(line) {
                let leading = config
                    .blocks
                    .last_mut()
                    .map(HostBlock::detach_tail)
                    .unwrap_or_default();
                config.blocks.push(HostBlock {
                    leading,
                    header: line.to_string(),
                    lines: Vec::new(),
                });
                continue;
            }

            match config.blocks.last_mut() {
                Some(block) => block.lines.push(line.to_string()),
                None => config.preamble.push(line.to_string()),
            }
        }

        if let Some(block) = config.blocks.last_mut() {
            config.trailer = block.detach_tail();
        }
        config
    }

    pub fn render(&self) -> String {
        let mut lines = self.preamble.clone();
        for block in &self.blocks {
            block.render_into(&mut lines);
        }
        lines.extend(self.trailer.iter().cloned());
        if lines.is_empty() {
            return String::new();
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Drops every block for exactly `hostname`, returning how many went.
    /// Comments above a dropped block are kept in its place.
    pub fn remove_host(&mut self, hostname: &str) -> usize {
        let opened_file = self.preamble.is_empty()
            && self.blocks.first().is_some_and(|block| block.is_host(hostname));
        let mut removed = 0;
        let mut orphaned = Vec::new();
        let mut kept = Vec::with_capacity(self.blocks.len());

        for mut block in self.blocks.drain(..) {
            if block.is_host(hostname) {
                removed += 1;
                orphaned.extend(
                    block
                        .leading
                        .into_iter()
                        .filter(|line| !line.trim().is_empty()),
                );
                continue;
            }
            if !orphaned.is_empty() {
                orphaned.append(&mut block.leading);
                block.leading = std::mem::take(&mut orphaned);
            }
            kept.push(block);
        }

        if !orphaned.is_empty() {
            orphaned.append(&mut self.trailer);
            self.trailer = orphaned;
        }
        self.blocks = kept;

        if opened_file {
            let head = match self.blocks.first_mut() {
                Some(block) => &mut block.leading,
                None => &mut self.trailer,
            };
            let blanks = head.iter().take_while(|line| line.trim().is_empty()).count();
            head.drain(..blanks);
        }
        removed
    }

    pub fn upsert_host(&mut self, entry: &HostEntry) {
        let removed = self.remove_host(&entry.hostname);
        if removed > 0 {
            debug!(host = %entry.hostname, removed, "replacing stale host block");
        }

        let mut leading = std::mem::take(&mut self.trailer);
        let previous_line = leading
            .last()
            .map(String::as_str)
            .or_else(|| self.blocks.last().map(HostBlock::last_line))
            .or_else(|| self.preamble.last().map(String::as_str));
        if previous_line.is_some_and(|line| !line.trim().is_empty()) {
            leading.push(String::new());
        }

        let mut block = entry.to_block();
        block.leading = leading;
        self.blocks.push(block);
    }
}

pub fn load(path: &Path) -> io::Result<SshConfig> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(SshConfig::parse(&raw)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(SshConfig::default()),
        Err(error) => Err(error),
    }
}

pub fn save(path: &Path, config: &SshConfig) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let permissions = fs::metadata(path).ok().map(|meta| meta.permissions());
    let staging = parent.join(format!(
        ".{}.burrow-tmp",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string())
    ));

    let written = (|| {
        let mut file = fs::File::create(&staging)?;
        file.write_all(config.render().as_bytes())?;
        file.sync_all()?;
        match permissions {
            Some(permissions) => fs::set_permissions(&staging, permissions)?,
            None => restrict_to_owner(&staging)?,
        }
        fs::rename(&staging, path)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&staging);
    }
    written
}

pub fn upsert_host(path: &Path, entry: &HostEntry) -> Result<(), BurrowError> {
    let sync_error = |source| BurrowError::ConfigSynchronization {
        path: path.to_path_buf(),
        source,
    };

    let mut config = load(path).map_err(sync_error)?;
    config.upsert_host(entry);
    save(path, &config).map_err(sync_error)?;

    info!(host = %entry.hostname, port = entry.local_port, "ssh config entry updated");
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn split_keyword(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let end = trimmed.find(|c: char| c.is_whitespace() || c == '=')?;
    let (keyword, rest) = trimmed.split_at(end);
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '=');
    Some((keyword, rest))
}

fn is_detachable(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with('#')
}

fn starts_section(line: &str) -> bool {
    split_keyword(line).is_some_and(|(keyword, _)| {
        keyword.eq_ignore_ascii_case("host") || keyword.eq_ignore_ascii_case("match")
    })
}

fn quote(value: &str) -> String {
    if value.contains(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}
