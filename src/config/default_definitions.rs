//! Built-in artifact definitions shipped with the collector.

use crate::config::definition::{artifacts_from_yaml, ArtifactDefinition};
use crate::error::Result;

pub const BUNDLED_DEFINITIONS: &str = r#"
name: DebianPackagesList
doc: Installed packages reported by dpkg.
sources:
- type: COMMAND
  attributes:
    cmd: /usr/bin/dpkg
    args: ["--list"]
labels: [Software]
supported_os: [Linux]
---
name: LinuxPasswdFile
doc: Local account database.
sources:
- type: FILE
  attributes:
    paths: [/etc/passwd, /etc/group]
labels: [Authentication]
supported_os: [Linux]
---
name: LinuxCronTabs
doc: System and per-user cron tables.
sources:
- type: FILE
  attributes:
    paths: [/etc/crontab, "/etc/cron.d/*", "/var/spool/cron/crontabs/*"]
labels: [Configuration Files]
supported_os: [Linux]
---
name: UnixHostsFile
doc: Static host name resolution table.
sources:
- type: FILE
  attributes:
    paths: [/etc/hosts]
labels: [Network]
supported_os: [Linux, Darwin]
---
name: UnixShellHistory
doc: Shell history of every known user.
sources:
- type: FILE
  attributes:
    paths: ["%%users.homedir%%/.bash_history", "%%users.homedir%%/.zsh_history"]
labels: [Software]
supported_os: [Linux, Darwin]
---
name: MacOSLaunchAgents
doc: Per-user and system launch agents.
sources:
- type: FILE
  attributes:
    paths: ["/Library/LaunchAgents/*.plist", "%%users.homedir%%/Library/LaunchAgents/*.plist"]
labels: [Software]
supported_os: [Darwin]
---
name: WindowsHostsFile
doc: Static host name resolution table.
sources:
- type: FILE
  attributes:
    paths: ['%%environ_systemroot%%\System32\drivers\etc\hosts']
labels: [Network]
supported_os: [Windows]
---
name: WindowsRunKeys
doc: Programs started at logon through the Run and RunOnce keys.
sources:
- type: REGISTRY_KEY
  attributes:
    keys:
    - 'HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Run\*'
    - 'HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\RunOnce\*'
    - 'HKEY_USERS\%%users.sid%%\Software\Microsoft\Windows\CurrentVersion\Run\*'
    - 'HKEY_USERS\%%users.sid%%\Software\Microsoft\Windows\CurrentVersion\RunOnce\*'
labels: [Software]
supported_os: [Windows]
---
name: WindowsPersistenceMechanismFiles
doc: Binaries referenced by persistence mechanisms.
sources:
- type: ARTIFACT_FILES
  attributes:
    artifact_list: [WindowsRunKeys]
labels: [Software]
supported_os: [Windows]
---
name: WMIInstalledSoftware
doc: Installed products reported by WMI.
sources:
- type: WMI
  attributes:
    query: SELECT Name, Vendor, Version FROM Win32_Product
labels: [Software]
supported_os: [Windows]
---
name: RunningProcesses
doc: Processes running at collection time.
sources:
- type: LIST_PROCESSES
labels: [Processes]
---
name: BasicTriage
doc: Small cross-platform triage set.
sources:
- type: ARTIFACT_GROUP
  attributes:
    names: [RunningProcesses, UnixHostsFile, WindowsHostsFile, LinuxPasswdFile, WindowsRunKeys]
labels: [Triage]
"#;

/// Parse the built-in definitions.
pub fn bundled_definitions() -> Result<Vec<ArtifactDefinition>> {
    artifacts_from_yaml(BUNDLED_DEFINITIONS)
}
