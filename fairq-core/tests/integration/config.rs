use std::io::Write;

use bytesize::ByteSize;
use fairq_core::cells::queue::InnerQueueConfig;
use fairq_core::cells::StdPacket;
use fairq_core::config::DrrCellBuildConfig;
use fairq_core::filter::FilterKind;
use fairq_core::Error;

fn config_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test_log::test]
fn load_toml() {
    let file = config_file(
        ".toml",
        r#"
        byte_limit = "500 KiB"
        flows = 64
        mtu = 9000
        filters = ["ipv4"]

        [queue]
        type = "CoDel"
        target = "2ms"
        interval = "50ms"
        "#,
    );
    let config = DrrCellBuildConfig::from_file(file.path()).unwrap();
    assert_eq!(config.byte_limit, Some(ByteSize::kib(500)));
    assert_eq!(config.filters, Some(vec![FilterKind::Ipv4]));

    let drr = config.into_scheduler::<StdPacket>().unwrap();
    assert_eq!(drr.flows(), 64);
    assert_eq!(drr.quantum(), 9000);
    assert_eq!(drr.byte_limit(), 500 * 1024);
    let InnerQueueConfig::CoDel(codel) = drr.queue_config() else {
        panic!("expected CoDel, got {:?}", drr.queue_config());
    };
    assert_eq!(codel.target, std::time::Duration::from_millis(2));
    assert_eq!(codel.interval, std::time::Duration::from_millis(50));
}

#[test_log::test]
fn load_json_with_defaults() {
    let file = config_file(".json", r#"{"quantum": 600, "queue": {"type": "Infinite"}}"#);
    let config = DrrCellBuildConfig::from_file(file.path()).unwrap();
    assert_eq!(config.flows, None);
    let drr = config.into_scheduler::<StdPacket>().unwrap();
    assert_eq!(drr.quantum(), 600);
    assert_eq!(drr.flows(), 1024);
    assert_eq!(drr.byte_limit(), 1000 * 1024);
    assert!(matches!(drr.queue_config(), InnerQueueConfig::Infinite(_)));
}

#[test_log::test]
fn reject_bad_files() {
    let file = config_file(".yaml", "flows: 3");
    assert!(matches!(
        DrrCellBuildConfig::from_file(file.path()),
        Err(Error::ConfigError(_))
    ));

    let file = config_file(".toml", "flows = -1");
    assert!(matches!(
        DrrCellBuildConfig::from_file(file.path()),
        Err(Error::ConfigError(_))
    ));

    let file = config_file(".toml", "flows = 0");
    let config = DrrCellBuildConfig::from_file(file.path()).unwrap();
    assert!(matches!(
        config.into_scheduler::<StdPacket>(),
        Err(Error::DrrConfig(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        DrrCellBuildConfig::from_file(dir.path().join("missing.toml")),
        Err(Error::ConfigError(_))
    ));
}
