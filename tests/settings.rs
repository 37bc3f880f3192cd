use std::fs;

use metaquery::datatype::ValueType;
use metaquery::error::MetaQueryError;
use metaquery::settings::Settings;

// one test, since the environment is shared by every test in the binary
#[test]
fn layered_settings() {
    let defaults = Settings::load(None).expect("defaults load");
    assert_eq!(defaults, Settings::default());
    assert_eq!(defaults.default_type, ValueType::String);
    assert!(defaults.optimize);

    let path = std::env::temp_dir().join(format!("metaquery-settings-{}.toml", std::process::id()));
    fs::write(&path, "database = \"catalog.db\"\ndefault_type = \"Int\"\noptimize = false\n").expect("written");
    let from_file = Settings::load(Some(path.as_path())).expect("file loads");
    assert_eq!(from_file.database, "catalog.db");
    assert_eq!(from_file.default_type, ValueType::Int);
    assert!(!from_file.optimize);
    assert_eq!(from_file.log_filter, "info");

    unsafe { std::env::set_var("METAQUERY_DATABASE", "override.db") };
    let overridden = Settings::load(Some(path.as_path())).expect("environment loads");
    unsafe { std::env::remove_var("METAQUERY_DATABASE") };
    assert_eq!(overridden.database, "override.db");
    assert_eq!(overridden.default_type, ValueType::Int);

    fs::write(&path, "default_type = \"Color\"\n").expect("written");
    let unknown = Settings::load(Some(path.as_path()));
    fs::remove_file(&path).expect("removed");
    assert!(matches!(unknown, Err(MetaQueryError::Config(_))), "{unknown:?}");

    assert!(matches!(
        Settings::load(Some(std::env::temp_dir().join("metaquery-absent.toml").as_path())),
        Err(MetaQueryError::Config(_))
    ));
}
