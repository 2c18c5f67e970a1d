use nix::mount::MsFlags;
use serde::Serialize;
use std::fmt;

/// Subset of mount(2) flags a plan entry may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MountFlags {
    pub nosuid: bool,
    pub noexec: bool,
    pub nodev: bool,
}

impl MountFlags {
    pub const NONE: Self = Self {
        nosuid: false,
        noexec: false,
        nodev: false,
    };

    pub const fn new(nosuid: bool, noexec: bool, nodev: bool) -> Self {
        Self {
            nosuid,
            noexec,
            nodev,
        }
    }

    pub fn to_ms_flags(self) -> MsFlags {
        let mut flags = MsFlags::empty();
        if self.nosuid {
            flags |= MsFlags::MS_NOSUID;
        }
        if self.noexec {
            flags |= MsFlags::MS_NOEXEC;
        }
        if self.nodev {
            flags |= MsFlags::MS_NODEV;
        }
        flags
    }
}

impl fmt::Display for MountFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.nosuid, "nosuid"),
            (self.noexec, "noexec"),
            (self.nodev, "nodev"),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            f.write_str("defaults")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

/// One virtual filesystem mounted under the sandbox root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    /// Used as both the mount source and the filesystem type
    pub source_type: &'static str,
    /// Mount point relative to the root
    pub target: &'static str,
    pub flags: MountFlags,
    pub data: Option<&'static str>,
}

/// The fixed plan, in mount order. Teardown runs it backwards.
pub const MOUNT_PLAN: [MountEntry; 5] = [
    MountEntry {
        source_type: "proc",
        target: "proc",
        flags: MountFlags::new(true, true, true),
        data: None,
    },
    MountEntry {
        source_type: "sysfs",
        target: "sys",
        flags: MountFlags::new(true, true, true),
        data: None,
    },
    MountEntry {
        source_type: "devtmpfs",
        target: "dev",
        flags: MountFlags::new(true, false, false),
        data: None,
    },
    // Device nodes under dev/pts must stay usable, so never nodev here.
    MountEntry {
        source_type: "devpts",
        target: "dev/pts",
        flags: MountFlags::new(true, true, false),
        data: None,
    },
    MountEntry {
        source_type: "tmpfs",
        target: "run",
        flags: MountFlags::new(true, false, true),
        data: Some("mode=0755"),
    },
];
