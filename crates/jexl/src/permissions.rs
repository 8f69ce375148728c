//! Permissions and sandboxing for host-object dispatch.
//!
//! A permission is a predicate over `(class, member)` consulted by the
//! uberspect before any getter, setter, method, constructor or operator
//! overload is handed to the interpreter. A denied member behaves exactly
//! like a missing one, so `safe` navigation still produces null instead of
//! leaking the existence of the member.
//!
//! The [`Sandbox`] layers finer-grained per-class allow/deny lists for
//! property reads, property writes and method calls on top of the
//! permission predicate.

use std::{fmt, sync::Arc};

use ahash::{AHashMap, AHashSet};

/// Class-name prefixes denied under [`JexlPermissions::Restricted`].
///
/// The restricted profile exists so an engine evaluating untrusted text is
/// safe by default: anything that can reach the process, the file system or
/// the host's own reflection machinery is out.
const RESTRICTED_PREFIXES: &[&str] = &[
    "host.sys",
    "host.process",
    "host.reflect",
    "host.io",
    "java.lang.Runtime",
    "java.lang.ProcessBuilder",
    "java.lang.System",
    "java.lang.reflect",
];

/// The permission predicate gating uberspect resolution.
#[derive(Debug, Clone, Default)]
pub enum JexlPermissions {
    /// Everything is allowed; for trusted environments only.
    Unrestricted,
    /// Denies a curated list of dangerous class prefixes. The default.
    #[default]
    Restricted,
    /// An explicit allow/deny set built by [`JexlPermissions::parse`].
    Set(Arc<PermissionSet>),
}

impl JexlPermissions {
    /// Decides whether `member` of `class` may be resolved.
    #[must_use]
    pub fn allows(&self, class: &str, member: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Restricted => !RESTRICTED_PREFIXES.iter().any(|prefix| class.starts_with(prefix)),
            Self::Set(set) => set.allows(class, member),
        }
    }

    /// Parses permission source lines.
    ///
    /// Two line forms are recognized:
    /// - `package.*` — allow-line: classes under `package` are permitted;
    ///   once any allow-line exists, classes outside every allowed package
    ///   are denied.
    /// - `package.Class { member; … }` — deny-line: the listed members of
    ///   that class are denied; an empty block denies the whole class.
    ///
    /// Each input string may contain several lines.
    pub fn parse(sources: &[&str]) -> Result<Self, PermissionParseError> {
        let mut set = PermissionSet::default();
        let mut lines = sources.iter().flat_map(|s| s.lines()).map(str::trim);
        while let Some(line) = lines.next() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(package) = line.strip_suffix(".*") {
                if package.is_empty() {
                    return Err(PermissionParseError::new(line, "empty package"));
                }
                set.allowed_packages.push(format!("{package}."));
                continue;
            }
            let Some(brace) = line.find('{') else {
                return Err(PermissionParseError::new(line, "expected 'package.*' or 'Class { ... }'"));
            };
            let class = line[..brace].trim();
            if class.is_empty() {
                return Err(PermissionParseError::new(line, "missing class name"));
            }
            let mut members = AHashSet::new();
            let mut rest = line[brace + 1..].to_string();
            loop {
                if let Some(end) = rest.find('}') {
                    collect_members(&rest[..end], &mut members);
                    break;
                }
                collect_members(&rest, &mut members);
                match lines.next() {
                    Some(next) => rest = next.to_string(),
                    None => return Err(PermissionParseError::new(line, "unterminated member block")),
                }
            }
            set.denied.insert(class.to_string(), members);
        }
        Ok(Self::Set(Arc::new(set)))
    }
}

fn collect_members(chunk: &str, members: &mut AHashSet<String>) {
    for member in chunk.split(';') {
        let member = member.trim();
        if !member.is_empty() {
            members.insert(member.to_string());
        }
    }
}

/// An explicit permission configuration.
#[derive(Debug, Default)]
pub struct PermissionSet {
    /// Allowed package prefixes (with trailing dot). Empty means any.
    allowed_packages: Vec<String>,
    /// Denied members per class; an empty set denies the whole class.
    denied: AHashMap<String, AHashSet<String>>,
}

impl PermissionSet {
    fn allows(&self, class: &str, member: &str) -> bool {
        if let Some(denied) = self.denied.get(class) {
            if denied.is_empty() || denied.contains(member) {
                return false;
            }
        }
        if self.allowed_packages.is_empty() {
            return true;
        }
        self.allowed_packages.iter().any(|p| class.starts_with(p.as_str()))
    }
}

/// A malformed permission line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionParseError {
    pub line: String,
    pub reason: &'static str,
}

impl PermissionParseError {
    fn new(line: &str, reason: &'static str) -> Self {
        Self {
            line: line.to_string(),
            reason,
        }
    }
}

impl fmt::Display for PermissionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid permission line '{}': {}", self.line, self.reason)
    }
}

impl std::error::Error for PermissionParseError {}

/// Kind of member access checked against a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxAction {
    Read,
    Write,
    Execute,
}

/// Allow/deny state for one access kind of one class.
#[derive(Debug, Clone, Default)]
enum Access {
    /// No restriction.
    #[default]
    AllowAll,
    /// Only the listed names are permitted.
    Allow(AHashSet<String>),
    /// The listed names are blocked; everything else is permitted. An empty
    /// deny set blocks every name.
    Deny(AHashSet<String>),
}

impl Access {
    fn permits(&self, name: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Allow(names) => names.contains(name),
            Self::Deny(names) => !names.is_empty() && !names.contains(name),
        }
    }
}

/// Per-class property/method restrictions.
#[derive(Debug, Clone, Default)]
pub struct ClassSandbox {
    read: Access,
    write: Access,
    execute: Access,
}

impl ClassSandbox {
    /// Restricts property reads to the listed names.
    pub fn read_only<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.read = Access::Allow(names.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts property writes to the listed names.
    pub fn write_only<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.write = Access::Allow(names.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts method calls to the listed names.
    pub fn execute_only<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.execute = Access::Allow(names.into_iter().map(Into::into).collect());
        self
    }

    /// Blocks the listed property reads.
    pub fn deny_read<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.read = Access::Deny(names.into_iter().map(Into::into).collect());
        self
    }

    /// Blocks the listed property writes.
    pub fn deny_write<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.write = Access::Deny(names.into_iter().map(Into::into).collect());
        self
    }

    /// Blocks the listed method calls.
    pub fn deny_execute<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.execute = Access::Deny(names.into_iter().map(Into::into).collect());
        self
    }

    /// Blocks everything on this class.
    pub fn deny_all(&mut self) -> &mut Self {
        self.read = Access::Deny(AHashSet::new());
        self.write = Access::Deny(AHashSet::new());
        self.execute = Access::Deny(AHashSet::new());
        self
    }

    fn permits(&self, action: SandboxAction, name: &str) -> bool {
        match action {
            SandboxAction::Read => self.read.permits(name),
            SandboxAction::Write => self.write.permits(name),
            SandboxAction::Execute => self.execute.permits(name),
        }
    }
}

/// Per-class allow/deny lists layered on top of [`JexlPermissions`].
///
/// Classes without an entry are unrestricted; permissions still apply.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    classes: AHashMap<String, ClassSandbox>,
}

impl Sandbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (created-on-demand) sandbox entry for a class.
    pub fn restrict(&mut self, class: &str) -> &mut ClassSandbox {
        self.classes.entry(class.to_string()).or_default()
    }

    /// Decides whether `name` of `class` may be accessed for `action`.
    #[must_use]
    pub fn permits(&self, class: &str, action: SandboxAction, name: &str) -> bool {
        self.classes.get(class).is_none_or(|c| c.permits(action, name))
    }
}
