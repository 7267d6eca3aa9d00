// CLASSIFICATION: COMMUNITY
// Filename: redirect.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

use std::fs;
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixListener;
use std::path::Path;

use cohesix_preopen::redirect::{self, handoff};
use cohesix_preopen::{current_default, pack, set_default, DefaultRegistryGuard, Registry};
use serial_test::serial;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A scratch directory registered as `/sandbox` in the default registry.
struct Sandbox {
    dir: TempDir,
    fd: i32,
    _guard: DefaultRegistryGuard,
}

impl Sandbox {
    fn new() -> Self {
        init_logging();
        let guard = DefaultRegistryGuard::new();
        let dir = tempfile::tempdir().unwrap();
        let mut reg = Registry::with_capacity(2).unwrap();
        let fd = reg.preopen_as("/sandbox", dir.path(), 0).unwrap();
        set_default(Some(reg.share())).unwrap();
        Sandbox {
            dir,
            fd,
            _guard: guard,
        }
    }

    fn real(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        drop(unsafe { OwnedFd::from_raw_fd(self.fd) });
    }
}

fn errno(err: std::io::Error) -> i32 {
    err.raw_os_error().unwrap_or(0)
}

#[test]
#[serial]
fn without_registry_paths_pass_through() {
    let _guard = DefaultRegistryGuard::new();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plain.txt");
    fs::write(&file, b"ambient").unwrap();

    let fd = redirect::open(&file, libc::O_RDONLY, 0).unwrap();
    let mut text = String::new();
    fs::File::from(fd).read_to_string(&mut text).unwrap();
    assert_eq!(text, "ambient");
    assert!(current_default().is_none());
}

#[test]
#[serial]
fn open_resolves_below_the_prefix() {
    let sb = Sandbox::new();
    fs::create_dir(sb.real("sub")).unwrap();
    fs::write(sb.real("sub/data.txt"), b"hello").unwrap();

    let fd = redirect::open(Path::new("/sandbox/sub/data.txt"), libc::O_RDONLY, 0).unwrap();
    let mut text = String::new();
    fs::File::from(fd).read_to_string(&mut text).unwrap();
    assert_eq!(text, "hello");
}

#[test]
#[serial]
fn open_creates_with_mode() {
    let sb = Sandbox::new();
    let fd = redirect::open(
        Path::new("/sandbox/new.txt"),
        libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL,
        0o600,
    )
    .unwrap();
    drop(fd);
    assert!(sb.real("new.txt").is_file());
}

#[test]
#[serial]
fn open_of_the_prefix_duplicates_its_descriptor() {
    let sb = Sandbox::new();
    let fd = redirect::open(Path::new("/sandbox/"), libc::O_RDONLY | libc::O_CLOEXEC, 0).unwrap();
    assert_ne!(fd.as_raw_fd(), sb.fd);
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
    assert_ne!(flags & libc::FD_CLOEXEC, 0);

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    assert_eq!(unsafe { libc::fstat(fd.as_raw_fd(), &mut st) }, 0);
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFDIR);
}

#[test]
#[serial]
fn unmatched_paths_fail_like_the_plain_call() {
    let _sb = Sandbox::new();
    let err = redirect::open(Path::new("/sandboxed-elsewhere/x"), libc::O_RDONLY, 0).unwrap_err();
    assert_eq!(errno(err), libc::ENOENT);
}

#[test]
#[serial]
fn stat_follows_links_and_lstat_does_not() {
    let sb = Sandbox::new();
    fs::write(sb.real("target"), b"12345").unwrap();
    std::os::unix::fs::symlink("target", sb.real("link")).unwrap();

    let st = redirect::stat(Path::new("/sandbox/link")).unwrap();
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFREG);
    assert_eq!(st.st_size, 5);

    let lst = redirect::lstat(Path::new("/sandbox/link")).unwrap();
    assert_eq!(lst.st_mode & libc::S_IFMT, libc::S_IFLNK);

    let root = redirect::stat(Path::new("/sandbox")).unwrap();
    assert_eq!(root.st_mode & libc::S_IFMT, libc::S_IFDIR);
}

#[test]
#[serial]
fn access_and_eaccess_check_through_the_directory() {
    let sb = Sandbox::new();
    fs::write(sb.real("present"), b"").unwrap();

    redirect::access(Path::new("/sandbox/present"), libc::F_OK).unwrap();
    redirect::eaccess(Path::new("/sandbox/present"), libc::R_OK).unwrap();
    let err = redirect::access(Path::new("/sandbox/absent"), libc::F_OK).unwrap_err();
    assert_eq!(errno(err), libc::ENOENT);
}

#[test]
#[serial]
fn unlink_removes_the_file() {
    let sb = Sandbox::new();
    fs::write(sb.real("doomed"), b"").unwrap();
    redirect::unlink(Path::new("/sandbox/doomed")).unwrap();
    assert!(!sb.real("doomed").exists());
    let err = redirect::unlink(Path::new("/sandbox/doomed")).unwrap_err();
    assert_eq!(errno(err), libc::ENOENT);
}

#[test]
#[serial]
fn rename_resolves_both_operands() {
    let sb = Sandbox::new();
    let other = tempfile::tempdir().unwrap();
    let mut reg = Registry::clone(&current_default().unwrap());
    let other_fd = reg.preopen_as("/other", other.path(), 0).unwrap();
    set_default(Some(reg.share())).unwrap();

    fs::write(sb.real("from"), b"moved").unwrap();
    redirect::rename(Path::new("/sandbox/from"), Path::new("/other/to")).unwrap();
    assert!(!sb.real("from").exists());
    assert_eq!(fs::read(other.path().join("to")).unwrap(), b"moved");
    drop(unsafe { OwnedFd::from_raw_fd(other_fd) });
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn connect_reaches_a_socket_below_the_prefix() {
    let sb = Sandbox::new();
    let listener = UnixListener::bind(sb.real("ctl.sock")).unwrap();

    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    assert!(raw >= 0);
    let sock = unsafe { OwnedFd::from_raw_fd(raw) };
    redirect::connect(sock.as_fd(), Path::new("/sandbox/ctl.sock")).unwrap();
    listener.accept().unwrap();
}

#[test]
#[serial]
fn connect_rejects_overlong_paths() {
    let _sb = Sandbox::new();
    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    let sock = unsafe { OwnedFd::from_raw_fd(raw) };
    let long = format!("/sandbox/{}", "x".repeat(200));
    let err = redirect::connect(sock.as_fd(), Path::new(&long)).unwrap_err();
    assert_eq!(errno(err), libc::ENAMETOOLONG);
}

#[test]
#[serial]
fn dlopen_of_missing_library_reports_error() {
    let _sb = Sandbox::new();
    let err = redirect::dlopen(Path::new("/sandbox/libabsent.so"), libc::RTLD_NOW).unwrap_err();
    assert_eq!(errno(err), libc::ENOENT);
}

#[test]
#[serial]
fn dlopen_of_a_non_library_fails() {
    let sb = Sandbox::new();
    fs::write(sb.real("libfake.so"), b"not an object").unwrap();
    assert!(redirect::dlopen(Path::new("/sandbox/libfake.so"), libc::RTLD_NOW).is_err());
}

#[test]
#[serial]
fn environment_handoff_installs_registry() {
    init_logging();
    let _guard = DefaultRegistryGuard::new();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("inherited"), b"x").unwrap();

    let mut reg = Registry::with_capacity(1).unwrap();
    let dir_fd = reg.preopen_as("/inherited", dir.path(), 0).unwrap();
    let segment = pack(&reg).unwrap();
    let value = handoff::inheritable(segment.as_fd()).unwrap();
    assert_eq!(value, segment.as_raw_fd().to_string());

    std::env::set_var(handoff::SHARED_MEMORY_FD_VAR, &value);
    let adopted = redirect::installed();
    std::env::remove_var(handoff::SHARED_MEMORY_FD_VAR);

    let adopted = adopted.unwrap();
    assert_eq!(adopted.fd_at(0), Some(dir_fd));
    assert!(current_default().is_some());
    redirect::access(Path::new("/inherited/inherited"), libc::F_OK).unwrap();
    drop(unsafe { OwnedFd::from_raw_fd(dir_fd) });
}

#[test]
#[serial]
fn environment_is_consulted_once() {
    let _guard = DefaultRegistryGuard::new();
    std::env::set_var(handoff::SHARED_MEMORY_FD_VAR, "not-a-number");
    assert!(redirect::installed().is_none());

    let segment = pack(&Registry::with_capacity(0).unwrap()).unwrap();
    std::env::set_var(handoff::SHARED_MEMORY_FD_VAR, segment.as_raw_fd().to_string());
    assert!(redirect::installed().is_none());
    std::env::remove_var(handoff::SHARED_MEMORY_FD_VAR);
}

#[test]
#[serial]
fn closed_descriptor_in_environment_is_ignored() {
    let _guard = DefaultRegistryGuard::new();
    let segment = pack(&Registry::with_capacity(0).unwrap()).unwrap();
    let stale = segment.as_raw_fd().to_string();
    drop(segment);
    std::env::set_var(handoff::SHARED_MEMORY_FD_VAR, stale);
    assert!(redirect::installed().is_none());
    std::env::remove_var(handoff::SHARED_MEMORY_FD_VAR);
}
