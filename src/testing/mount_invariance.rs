/// Mount table snapshots scoped to a sandbox root
///
/// Used by `rootbox mounts` and by the integration tests to prove that a
/// closed session leaves the host mount table exactly as it found it.
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One line of /proc/self/mountinfo
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountInfoEntry {
    pub mount_id: u32,
    pub parent_id: u32,
    pub device: String,
    pub mount_point: PathBuf,
    pub mount_options: String,
    pub filesystem_type: String,
}

pub fn parse_mountinfo() -> io::Result<Vec<MountInfoEntry>> {
    let content = fs::read_to_string("/proc/self/mountinfo")?;
    Ok(content.lines().filter_map(parse_mountinfo_line).collect())
}

/// Format: mount_id parent_id major:minor root mount_point options [optional...] - fs_type source super_options
fn parse_mountinfo_line(line: &str) -> Option<MountInfoEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 10 {
        return None;
    }

    let sep_pos = parts.iter().position(|&p| p == "-")?;
    if sep_pos < 6 || sep_pos + 1 >= parts.len() {
        return None;
    }

    Some(MountInfoEntry {
        mount_id: parts[0].parse().ok()?,
        parent_id: parts[1].parse().ok()?,
        device: parts[2].to_string(),
        mount_point: PathBuf::from(unescape_octal(parts[4])),
        mount_options: parts[5].to_string(),
        filesystem_type: parts[sep_pos + 1].to_string(),
    })
}

/// mountinfo escapes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mounts at or below `root`, in mount order.
pub fn mounts_under(root: &Path) -> io::Result<Vec<MountInfoEntry>> {
    Ok(parse_mountinfo()?
        .into_iter()
        .filter(|entry| entry.mount_point.starts_with(root))
        .collect())
}

/// Normalized `mount_point|fs_type` keys for everything below `root`.
pub fn capture_under(root: &Path) -> io::Result<BTreeSet<String>> {
    Ok(mounts_under(root)?
        .iter()
        .map(|entry| format!("{}|{}", entry.mount_point.display(), entry.filesystem_type))
        .collect())
}

/// Diff against a baseline: (added, removed).
pub fn compare_under(
    root: &Path,
    baseline: &BTreeSet<String>,
) -> io::Result<(Vec<String>, Vec<String>)> {
    let current = capture_under(root)?;
    let added = current.difference(baseline).cloned().collect();
    let removed = baseline.difference(&current).cloned().collect();
    Ok((added, removed))
}

/// True when the mounts below `root` match `baseline` exactly.
pub fn verify_mount_invariance(root: &Path, baseline: &BTreeSet<String>) -> io::Result<bool> {
    let (added, removed) = compare_under(root, baseline)?;

    for mount in &added {
        log::warn!("Mount invariance violation, added: {}", mount);
    }
    for mount in &removed {
        log::warn!("Mount invariance violation, removed: {}", mount);
    }

    Ok(added.is_empty() && removed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_mountinfo_line() {
        let line = "25 30 0:23 / /sys rw,nosuid,nodev,noexec,relatime shared:7 - sysfs sysfs rw";
        let entry = parse_mountinfo_line(line).unwrap();

        assert_eq!(entry.mount_id, 25);
        assert_eq!(entry.parent_id, 30);
        assert_eq!(entry.mount_point, PathBuf::from("/sys"));
        assert_eq!(entry.filesystem_type, "sysfs");
    }

    #[test]
    fn parses_lines_without_optional_fields() {
        let line = "40 25 0:5 / /srv/jail/dev rw,nosuid - devtmpfs devtmpfs rw,size=4k";
        let entry = parse_mountinfo_line(line).unwrap();
        assert_eq!(entry.filesystem_type, "devtmpfs");
    }

    #[test]
    fn unescapes_spaces_in_mount_points() {
        let line = "41 25 0:6 / /srv/my\\040jail/proc rw - proc proc rw";
        let entry = parse_mountinfo_line(line).unwrap();
        assert_eq!(entry.mount_point, PathBuf::from("/srv/my jail/proc"));
    }

    #[test]
    fn rejects_truncated_lines() {
        assert!(parse_mountinfo_line("25 30 0:23 / /sys").is_none());
    }

    #[test]
    fn fresh_directory_has_no_mounts_below_it() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let baseline = capture_under(&root).unwrap();

        assert!(baseline.is_empty());
        assert!(verify_mount_invariance(&root, &baseline).unwrap());
    }

    #[test]
    fn host_mountinfo_is_readable() {
        let entries = parse_mountinfo().unwrap();
        assert!(!entries.is_empty());
    }
}
