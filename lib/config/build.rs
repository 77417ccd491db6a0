use std::{collections::BTreeMap, env, fs, path::PathBuf};

use serde::Deserialize;

/// A single configuration value. Numbers become `usize` constants, strings become `&str`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Number(usize),
    Text(String),
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let profile = env::var("DEVMODEL_PROFILE").unwrap_or_else(|_| String::from("default"));
    let config_path = PathBuf::from(manifest_dir).join("../../config.json");
    let flags_str = fs::read_to_string(&config_path).unwrap();
    let profiles: BTreeMap<String, BTreeMap<String, Flag>> =
        serde_json::from_str(&flags_str).unwrap();
    let flags = match profiles.get(profile.as_str()) {
        Some(value) => value,
        None => panic!("Unknown configuration profile '{}'.", profile),
    };
    make_flags(flags);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../config.json");
    println!("cargo:rerun-if-env-changed=DEVMODEL_PROFILE");
}

fn make_flags(flagmap: &BTreeMap<String, Flag>) {
    let mut s = String::from("");
    for (key, flag) in flagmap {
        match flag {
            Flag::Number(value) => s += format!("pub const {}: usize = {};\n", key, value).as_str(),
            Flag::Text(value) => s += format!("pub const {}: &str = {:?};\n", key, value).as_str(),
        }
    }
    let out_dir = env::var("OUT_DIR").unwrap();
    let path = PathBuf::from(out_dir).join("build_flags.rs");
    fs::write(path, s).unwrap();
}
