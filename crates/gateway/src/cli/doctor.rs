use llmesh_domain::config::{Config, ConfigSeverity};
use llmesh_providers::ProviderRegistry;

/// Run every diagnostic check and print a summary. Returns `true` when
/// every check passed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("llmesh doctor");
    println!("=============\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_providers(config, &mut all_passed);
    check_writable_dir("Memory directory", &config.memory.dir, &mut all_passed);
    check_writable_dir("Chain workspace", &config.chain.workspace_root, &mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists { config_path.to_owned() } else { format!("{config_path} not found (using defaults)") },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check("Config validation", error_count == 0, format!("{} issue(s) ({error_count} error(s))", issues.len()));
        for issue in &issues {
            println!("      {issue}");
        }
    }
    if error_count > 0 {
        *all_passed = false;
    }
}

fn check_providers(config: &Config, all_passed: &mut bool) {
    let registry = ProviderRegistry::from_config(&config.endpoints);
    let ok = !registry.is_empty();
    print_check(
        "LLM endpoints initialized",
        ok,
        if ok {
            format!("{} of {} configured", registry.len(), config.endpoints.endpoints.len())
        } else {
            "none initialized".into()
        },
    );
    for err in registry.init_errors() {
        println!("      [WARN] {}: {}", err.endpoint_id, err.error);
    }
    if !ok {
        *all_passed = false;
    }
}

fn check_writable_dir(name: &str, path: &std::path::Path, all_passed: &mut bool) {
    let created = std::fs::create_dir_all(path).is_ok();
    let probe = path.join(".llmesh_doctor_probe");
    let writable = created && std::fs::write(&probe, b"probe").is_ok();
    let _ = std::fs::remove_file(&probe);

    let detail = if writable {
        format!("{} (writable)", path.display())
    } else {
        format!("{} (not writable)", path.display())
    };
    print_check(name, writable, detail);
    if !writable {
        *all_passed = false;
    }
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
