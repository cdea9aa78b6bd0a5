//! Execution targets: the local machine or a remote host.

use std::fmt;
use std::net::IpAddr;
#[cfg(unix)]
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::CmdStreamError;
use crate::Result;

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionTarget {
    /// A child process of this program.
    #[default]
    Local,
    /// A session opened by the remote transport.
    Remote(RemoteTarget),
}

impl ExecutionTarget {
    /// Parse a `[user@]host[:port]` remote target.
    pub fn remote(text: &str) -> Result<Self> {
        RemoteTarget::parse(text).map(ExecutionTarget::Remote)
    }

    /// Target for an optional host name.
    ///
    /// `None`, `localhost`, loopback addresses and this machine's own
    /// hostname all resolve to [`ExecutionTarget::Local`].
    pub fn for_host(host: Option<&str>) -> Result<Self> {
        match host {
            None => Ok(ExecutionTarget::Local),
            Some(text) => {
                let remote = RemoteTarget::parse(text)?;
                if remote.user.is_none() && remote.port.is_none() && is_localhost(&remote.host) {
                    Ok(ExecutionTarget::Local)
                } else {
                    Ok(ExecutionTarget::Remote(remote))
                }
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ExecutionTarget::Local)
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Local => f.write_str("local"),
            ExecutionTarget::Remote(remote) => remote.fmt(f),
        }
    }
}

/// Identity of a remote host.
///
/// `options` are transport-specific connection parameters passed through
/// untouched (for SSH: extra `ssh` arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub options: Vec<String>,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            options: Vec::new(),
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Parse `[user@]host[:port]`. Bracketed IPv6 (`[::1]:22`) is accepted.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (user, rest) = match text.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(invalid_target(text, "empty user")),
            None => (None, text),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid_target(text, "unterminated '['"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(parse_port(text, port)?),
                None if tail.is_empty() => None,
                None => return Err(invalid_target(text, "unexpected text after ']'")),
            };
            (host.to_string(), port)
        } else if rest.matches(':').count() == 1 {
            let (host, port) = rest.split_once(':').unwrap_or((rest, ""));
            (host.to_string(), Some(parse_port(text, port)?))
        } else {
            // Bare IPv6 addresses carry several colons and no port.
            (rest.to_string(), None)
        };

        if host.is_empty() {
            return Err(invalid_target(text, "empty host"));
        }

        Ok(Self {
            host,
            user,
            port,
            options: Vec::new(),
        })
    }

    /// `user@host` or `host`, as passed to the transport.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

fn parse_port(text: &str, port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| invalid_target(text, &format!("invalid port '{}'", port)))
}

fn invalid_target(text: &str, reason: &str) -> CmdStreamError {
    CmdStreamError::InvalidCommand(format!("invalid target '{}': {}", text, reason))
}

/// Whether `host` names this machine: `localhost`, a loopback address,
/// an address of one of its network interfaces, or its hostname.
pub fn is_localhost(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(addr) = host.parse::<IpAddr>() {
        return addr.is_loopback() || interface_addresses().contains(&addr);
    }
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .is_some_and(|name| name.eq_ignore_ascii_case(host))
}

/// Addresses assigned to this machine's network interfaces.
#[cfg(unix)]
pub fn interface_addresses() -> Vec<IpAddr> {
    let mut addrs = Vec::new();
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success getifaddrs stores a list head that we free below.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return addrs;
    }

    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: cursor is a node of the list returned by getifaddrs.
        let entry = unsafe { &*cursor };
        if !entry.ifa_addr.is_null() {
            // SAFETY: ifa_addr is non-null, and sa_family tells which
            // sockaddr layout it points to.
            match unsafe { (*entry.ifa_addr).sa_family } as libc::c_int {
                libc::AF_INET => {
                    let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                    addrs.push(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))));
                }
                libc::AF_INET6 => {
                    let sin6 = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in6) };
                    addrs.push(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)));
                }
                _ => {}
            }
        }
        cursor = entry.ifa_next;
    }

    // SAFETY: head came from getifaddrs and is freed once.
    unsafe { libc::freeifaddrs(head) };
    addrs
}

#[cfg(not(unix))]
pub fn interface_addresses() -> Vec<IpAddr> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_only() {
        let target = RemoteTarget::parse("build-01").unwrap();
        assert_eq!(target.host, "build-01");
        assert!(target.user.is_none());
        assert!(target.port.is_none());
    }

    #[test]
    fn test_parse_user_host_port() {
        let target = RemoteTarget::parse("deploy@build-01:2222").unwrap();
        assert_eq!(target.user.as_deref(), Some("deploy"));
        assert_eq!(target.host, "build-01");
        assert_eq!(target.port, Some(2222));
        assert_eq!(target.to_string(), "deploy@build-01:2222");
        assert_eq!(target.destination(), "deploy@build-01");
    }

    #[test]
    fn test_parse_ipv6() {
        let target = RemoteTarget::parse("[fe80::1]:22").unwrap();
        assert_eq!(target.host, "fe80::1");
        assert_eq!(target.port, Some(22));

        let target = RemoteTarget::parse("fe80::1").unwrap();
        assert_eq!(target.host, "fe80::1");
        assert!(target.port.is_none());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(RemoteTarget::parse("").is_err());
        assert!(RemoteTarget::parse("@host").is_err());
        assert!(RemoteTarget::parse("host:notaport").is_err());
        assert!(RemoteTarget::parse("[::1").is_err());
    }

    #[test]
    fn test_for_host_detects_localhost() {
        assert_eq!(ExecutionTarget::for_host(None).unwrap(), ExecutionTarget::Local);
        assert_eq!(
            ExecutionTarget::for_host(Some("localhost")).unwrap(),
            ExecutionTarget::Local
        );
        assert_eq!(
            ExecutionTarget::for_host(Some("127.0.0.1")).unwrap(),
            ExecutionTarget::Local
        );
        assert!(!ExecutionTarget::for_host(Some("192.0.2.10")).unwrap().is_local());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_interface_addresses_are_local() {
        let addrs = interface_addresses();
        assert!(addrs.iter().any(IpAddr::is_loopback));
        for addr in addrs {
            assert!(is_localhost(&addr.to_string()), "{} should be local", addr);
        }
    }

    #[test]
    fn test_explicit_user_keeps_remote() {
        let target = ExecutionTarget::for_host(Some("root@localhost")).unwrap();
        assert!(!target.is_local());
    }

    #[test]
    fn test_display() {
        assert_eq!(ExecutionTarget::Local.to_string(), "local");
        let remote = ExecutionTarget::remote("ops@db:2200").unwrap();
        assert_eq!(remote.to_string(), "ops@db:2200");
    }
}
