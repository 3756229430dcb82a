use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    chunk_size: Option<u32>,
    retry_limit: Option<u32>,
    fast_retry_limit: Option<u32>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
    #[serde(default)]
    classes: Vec<u32>,
}

struct ResolvedConfig {
    chunk_size: u32,
    retry_limit: u32,
    fast_retry_limit: u32,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let chunk_size = cfg.chunk_size.unwrap_or(32);
    assert!(
        chunk_size.is_power_of_two() && chunk_size >= 8,
        "chunk_size ({}) must be a power of 2 and >= 8",
        chunk_size
    );

    let retry_limit = cfg.retry_limit.unwrap_or(32);
    let fast_retry_limit = cfg.fast_retry_limit.unwrap_or(1);
    assert!(retry_limit > 0, "retry_limit must be > 0");
    assert!(fast_retry_limit > 0, "fast_retry_limit must be > 0");
    assert!(
        fast_retry_limit <= retry_limit,
        "fast_retry_limit ({}) must be <= retry_limit ({})",
        fast_retry_limit,
        retry_limit
    );

    ResolvedConfig {
        chunk_size,
        retry_limit,
        fast_retry_limit,
    }
}

fn validate_classes(classes: &[u32], chunk_size: u32) {
    assert!(!classes.is_empty(), "memque.toml: no block classes defined");
    assert!(
        classes.len() < 32,
        "memque.toml: too many classes ({}, max 31)",
        classes.len()
    );
    for (i, &size) in classes.iter().enumerate() {
        assert!(size > 0, "class {}: size must be > 0", i);
        assert!(
            size % chunk_size == 0,
            "class {}: size {} must be a multiple of chunk_size {}",
            i,
            size,
            chunk_size
        );
        if i > 0 {
            assert!(
                size > classes[i - 1],
                "class {}: size {} must be > previous size {}",
                i,
                size,
                classes[i - 1]
            );
        }
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/memque.toml", manifest_dir)
}

fn generate(cfg: &ResolvedConfig, classes: &[u32], out_path: &Path) {
    let mut code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const CHUNK_SIZE: u32 = {};\n\
         pub const RETRY_LIMIT: u32 = {};\n\
         pub const FAST_RETRY_LIMIT: u32 = {};\n\n",
        cfg.chunk_size, cfg.retry_limit, cfg.fast_retry_limit,
    );

    code.push_str(&format!(
        "pub const BLOCK_CLASSES: [u32; {}] = [\n",
        classes.len()
    ));
    for size in classes {
        code.push_str(&format!("    {},\n", size));
    }
    code.push_str("];\n");

    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=MEMQUE_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("MEMQUE_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");

    let resolved = resolve_config(&config.config);
    validate_classes(&config.classes, resolved.chunk_size);

    generate(
        &resolved,
        &config.classes,
        &Path::new(&out_dir).join("config_gen.rs"),
    );
}
