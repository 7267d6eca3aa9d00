// CLASSIFICATION: COMMUNITY
// Filename: manifest.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

use std::ffi::OsStr;
use std::fs;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use cohesix_preopen::{current_default, DefaultRegistryGuard, Manifest, PreopenError, Rights};
use serial_test::serial;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn close_all(reg: &cohesix_preopen::Registry) {
    for entry in reg {
        drop(unsafe { OwnedFd::from_raw_fd(entry.fd()) });
    }
}

fn is_open(fd: i32) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[test]
#[serial]
fn toml_manifest_builds_registry() {
    init_logging();
    let data = tempfile::tempdir().unwrap();
    let cfg = tempfile::tempdir().unwrap();
    let path = cfg.path().join("preopen.toml");
    fs::write(
        &path,
        format!(
            "capacity = 1\ntrack_rights = true\n\n[[preopen]]\npath = '{}'\nname = '/data'\n",
            data.path().display()
        ),
    )
    .unwrap();

    let manifest = Manifest::load(&path).unwrap();
    let reg = manifest.build().unwrap();
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.name_at(0), Some(OsStr::new("/data")));
    let rights = reg.get(0).unwrap().rights().unwrap();
    assert!(rights.contains(Rights::LOOKUP | Rights::READ));
    close_all(&reg);
}

#[test]
#[serial]
fn json_and_yaml_are_selected_by_extension() {
    let data = tempfile::tempdir().unwrap();
    let cfg = tempfile::tempdir().unwrap();
    let dir = data.path().display();

    let json = cfg.path().join("preopen.json");
    fs::write(&json, format!("{{\"preopen\":[{{\"path\":\"{dir}\"}}]}}")).unwrap();
    let yaml = cfg.path().join("preopen.yml");
    fs::write(&yaml, format!("capacity: 3\npreopen:\n  - path: \"{dir}\"\n    name: /y\n")).unwrap();

    let from_json = Manifest::load(&json).unwrap();
    assert_eq!(from_json.preopen[0].path, data.path());
    assert_eq!(from_json.preopen[0].prefix(), data.path());

    let from_yaml = Manifest::load(&yaml).unwrap();
    assert_eq!(from_yaml.capacity, 3);
    assert_eq!(from_yaml.preopen[0].name.as_deref(), Some("/y"));
}

#[test]
#[serial]
fn unreadable_manifest_is_a_manifest_error() {
    let cfg = tempfile::tempdir().unwrap();
    let missing = cfg.path().join("absent.toml");
    assert!(matches!(Manifest::load(&missing), Err(PreopenError::Manifest { .. })));

    let broken = cfg.path().join("broken.toml");
    fs::write(&broken, "[[preopen]]\nname = 3\n").unwrap();
    assert!(matches!(Manifest::load(&broken), Err(PreopenError::Manifest { .. })));
}

#[test]
#[serial]
fn optional_entries_are_skipped() {
    let data = tempfile::tempdir().unwrap();
    let manifest = Manifest::parse_toml(&format!(
        "[[preopen]]\npath = '{0}/missing'\noptional = true\n\n[[preopen]]\npath = '{0}'\n",
        data.path().display()
    ))
    .unwrap();
    let reg = manifest.build().unwrap();
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.name_at(0), Some(data.path().as_os_str()));
    close_all(&reg);
}

#[test]
#[serial]
fn failed_build_closes_what_it_opened() {
    let data = tempfile::tempdir().unwrap();
    let manifest = Manifest::parse_toml(&format!(
        "[[preopen]]\npath = '{0}'\n\n[[preopen]]\npath = '{0}/missing'\n",
        data.path().display()
    ))
    .unwrap();

    // The first entry receives the lowest free descriptor.
    let probe = {
        let scratch = fs::File::open("/").unwrap();
        scratch.as_raw_fd()
    };

    let err = manifest.build().unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    assert!(!is_open(probe));
}

#[test]
#[serial]
fn install_sets_the_default() {
    let _guard = DefaultRegistryGuard::new();
    let data = tempfile::tempdir().unwrap();
    let manifest = Manifest::parse_toml(&format!(
        "[[preopen]]\npath = '{}'\nname = '/srv'\n",
        data.path().display()
    ))
    .unwrap();
    let reg = manifest.install().unwrap();
    let installed = current_default().unwrap();
    assert_eq!(installed.name_at(0), Some(OsStr::new("/srv")));
    close_all(&reg);
}
