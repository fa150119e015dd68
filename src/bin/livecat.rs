use livecat::Jarfile;
use livecat::catalog::Catalog;
use livecat::catalog::deployment::Deployment;
use livecat::config::{LivecatConfig, RecoveryMode};
use livecat::manifest::{CommittedCatalog, load_committed};
use std::path::PathBuf;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "show" => cmd_show(&args[2..]),
        "classes" => cmd_classes(&args[2..]),
        "verify" => cmd_verify(&args[2..]),
        other => {
            print_usage();
            Err(format!("unknown command: {other}"))
        }
    }
}

fn cmd_show(args: &[String]) -> Result<(), String> {
    let (committed, catalog) = load(args)?;
    let manifest = &committed.manifest;
    println!("generation\t{}", manifest.generation);
    println!("catalog_hash\t{}", catalog.catalog_hash);
    println!("deployment_hash\t{}", catalog.deployment_hash);
    println!("artifact_file\t{}", manifest.artifact_file);
    println!("committed_at_micros\t{}", manifest.committed_at_micros);
    println!("schema_mode\t{:?}", catalog.deployment.schema_mode);
    println!("security_enabled\t{}", catalog.deployment.security.enabled);
    println!("tables\t{}", catalog.tables.len());
    println!("procedures\t{}", catalog.procedures.len());
    println!("classes\t{}", catalog.classes.len());
    for (name, table) in &catalog.tables {
        println!("table\t{name}\t{} columns", table.columns.len());
    }
    for name in catalog.procedures.keys() {
        println!("procedure\t{name}");
    }
    Ok(())
}

fn cmd_classes(args: &[String]) -> Result<(), String> {
    let (_, catalog) = load(args)?;
    let active = catalog.active_procedure_classes();
    for (name, class) in catalog.classes.iter() {
        let kind = if class.file.is_procedure() {
            "procedure"
        } else {
            "support"
        };
        let state = if active.contains(name) { "active" } else { "idle" };
        println!("{name}\t{kind}\t{state}\t{} bytes", class.bytes.len());
    }
    Ok(())
}

fn cmd_verify(args: &[String]) -> Result<(), String> {
    let (committed, catalog) = load(args)?;
    let manifest = &committed.manifest;
    if committed.reconstructed {
        println!("manifest\treconstructed from generation files");
    } else if catalog.catalog_hash != manifest.catalog_hash
        || catalog.deployment_hash != manifest.deployment_hash
    {
        return Err(format!(
            "generation {} does not match its recorded hashes",
            manifest.generation
        ));
    }
    println!(
        "ok\tgeneration={}\ttables={}\tprocedures={}\tclasses={}",
        manifest.generation,
        catalog.tables.len(),
        catalog.procedures.len(),
        catalog.classes.len()
    );
    Ok(())
}

fn load(args: &[String]) -> Result<(CommittedCatalog, Catalog), String> {
    let dir = parse_flag_value(args, "--dir").ok_or("--dir is required")?;
    let dir = PathBuf::from(dir);
    let config = parse_recovery_config(args)?;
    let committed = load_committed(&dir, config.hmac_key(), config.strict_recovery())
        .map_err(|e| format!("load {}: {e}", dir.display()))?
        .ok_or_else(|| format!("no committed catalog in {}", dir.display()))?;
    let deployment = Deployment::parse(&committed.deployment).map_err(|e| e.to_string())?;
    let catalog = Jarfile::decode(&committed.artifact, config.max_catalog_memory_bytes)
        .and_then(|jar| jar.compile(deployment))
        .map_err(|e| format!("generation {}: {e}", committed.manifest.generation))?
        .with_generation(committed.manifest.generation);
    Ok((committed, catalog))
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn parse_hmac_key_hex(args: &[String]) -> Result<Option<Vec<u8>>, String> {
    let Some(hex_key) = parse_flag_value(args, "--hmac-key-hex") else {
        return Ok(None);
    };
    hex::decode(hex_key)
        .map(Some)
        .map_err(|e| format!("invalid --hmac-key-hex: {e}"))
}

fn parse_recovery_config(args: &[String]) -> Result<LivecatConfig, String> {
    let mut cfg = LivecatConfig::default();
    if args.iter().any(|a| a == "--permissive") {
        cfg.recovery_mode = RecoveryMode::Permissive;
    }
    if let Some(key) = parse_hmac_key_hex(args)? {
        cfg = cfg.with_hmac_key(key);
    }
    Ok(cfg)
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  livecat show --dir <data-dir> [--hmac-key-hex <hex>] [--permissive]");
    eprintln!("  livecat classes --dir <data-dir> [--hmac-key-hex <hex>] [--permissive]");
    eprintln!("  livecat verify --dir <data-dir> [--hmac-key-hex <hex>] [--permissive]");
}
