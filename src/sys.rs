//! Account, group and ownership lookups through libc

use anyhow::{Context, Result, bail};
use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};

const INITIAL_BUFFER: usize = 4096;
const MAX_BUFFER: usize = 1 << 20;

/// A passwd entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
    /// GECOS field
    pub comment: String,
}

fn owned(ptr: *const libc::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: non-null pointers in passwd/group entries are NUL-terminated
    // strings inside the buffer we own for the duration of this call.
    unsafe { CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

/// Look up a user by name
///
/// Returns `None` when no such account exists.
pub fn lookup_user(name: &str) -> Result<Option<Account>> {
    let c_name = CString::new(name).context("Invalid user name")?;
    let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUFFER];

    loop {
        let mut pwd: MaybeUninit<libc::passwd> = MaybeUninit::uninit();
        let mut found: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: getpwnam_r writes into pwd and buf, both sized as declared.
        // We check the return code and the result pointer before reading.
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &raw mut found,
            )
        };

        if rc == libc::ERANGE && buf.len() < MAX_BUFFER {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            bail!(
                "getpwnam_r failed for {name}: {}",
                std::io::Error::from_raw_os_error(rc)
            );
        }
        if found.is_null() {
            return Ok(None);
        }

        // SAFETY: found is non-null, so pwd was initialized
        let pwd = unsafe { pwd.assume_init() };
        return Ok(Some(Account {
            name: owned(pwd.pw_name),
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
            home: PathBuf::from(owned(pwd.pw_dir)),
            shell: owned(pwd.pw_shell),
            comment: owned(pwd.pw_gecos),
        }));
    }
}

/// Look up a group id by name
pub fn lookup_group(name: &str) -> Result<Option<u32>> {
    let c_name = CString::new(name).context("Invalid group name")?;
    let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUFFER];

    loop {
        let mut grp: MaybeUninit<libc::group> = MaybeUninit::uninit();
        let mut found: *mut libc::group = std::ptr::null_mut();

        // SAFETY: same contract as getpwnam_r above
        let rc = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                grp.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &raw mut found,
            )
        };

        if rc == libc::ERANGE && buf.len() < MAX_BUFFER {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            bail!(
                "getgrnam_r failed for {name}: {}",
                std::io::Error::from_raw_os_error(rc)
            );
        }
        if found.is_null() {
            return Ok(None);
        }

        // SAFETY: found is non-null, so grp was initialized
        let grp = unsafe { grp.assume_init() };
        return Ok(Some(grp.gr_gid));
    }
}

/// Resolve an owner given by name or numeric id
pub fn resolve_uid(owner: &str) -> Result<u32> {
    if let Ok(uid) = owner.parse() {
        return Ok(uid);
    }
    match lookup_user(owner)? {
        Some(account) => Ok(account.uid),
        None => bail!("unknown user '{owner}'"),
    }
}

/// Resolve a group given by name or numeric id
pub fn resolve_gid(group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse() {
        return Ok(gid);
    }
    lookup_group(group)?.with_context(|| format!("unknown group '{group}'"))
}

/// Change owner and/or group; `None` leaves that half alone
pub fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    std::os::unix::fs::lchown(path, uid, gid)
        .with_context(|| format!("Failed to chown {}", path.display()))
}

/// Whether the process runs with root privileges
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_root() {
        let root = lookup_user("root").unwrap().expect("root account");
        assert_eq!(root.uid, 0);
        assert_eq!(root.gid, 0);
        assert_eq!(root.name, "root");
    }

    #[test]
    fn test_lookup_missing_user() {
        assert!(lookup_user("provisor-no-such-user").unwrap().is_none());
        assert!(resolve_uid("provisor-no-such-user").is_err());
    }

    #[test]
    fn test_resolve_numeric_ids() {
        assert_eq!(resolve_uid("1234").unwrap(), 1234);
        assert_eq!(resolve_gid("0").unwrap(), 0);
    }

    #[test]
    fn test_resolve_missing_group() {
        let err = resolve_gid("provisor-no-such-group").unwrap_err();
        assert!(err.to_string().contains("unknown group"));
    }

    #[test]
    fn test_chown_noop_without_ids() {
        let dir = tempfile::tempdir().unwrap();
        chown(dir.path(), None, None).unwrap();
    }
}
