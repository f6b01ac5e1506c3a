use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::Value;
use tracing::{info, warn};

use otterpgo_cache::{
    CacheRepository, HEADER_SIZE, Registry, RegistryEmitter, fingerprint, unwrap_module,
    wrap_module,
};
use otterpgo_config::{PgoConfig, ThresholdConfig, Tier};
use otterpgo_profile::{PlanArtifact, PlanBuilder, Profile};
use otterpgo_toolchain::{
    ApplyMode, DiskTransport, ProcessRunner, RecompileOrchestrator, SourceLocator, SyncMode,
};

use crate::cli::{InspectArgs, IterateArgs, PlanArgs, RegistryArgs, SyncDiskArgs, WrapArgs};
use crate::pipeline::ConvergenceController;

pub fn plan<R: ProcessRunner + ?Sized>(
    args: &PlanArgs,
    config: &PgoConfig,
    runner: &mut R,
) -> Result<()> {
    let profile = Profile::load(&args.profile)?;
    let thresholds = ThresholdConfig::new(
        args.call_threshold
            .unwrap_or(config.thresholds.call_threshold),
        args.cycle_threshold
            .unwrap_or(config.thresholds.cycle_threshold),
    );
    let plan = PlanBuilder::new(thresholds).build(&profile, &args.profile.display().to_string());

    println!(
        "Profile tag: {}",
        profile.profile_tag.as_deref().unwrap_or("unknown")
    );
    println!("Total modules: {}", plan.len());
    println!("Recommended recompile plan:\n");
    print!("{}", plan.render_table());

    if let Some(path) = &args.plan_out {
        plan.save(path)?;
        println!("\nWrote plan to {}", path.display());
    }

    if !args.apply {
        return Ok(());
    }

    let tag = args
        .profile_tag
        .as_deref()
        .unwrap_or_else(|| profile.tag_or(&config.cache.profile_tag));
    let repository = match &args.output_dir {
        Some(dir) => CacheRepository::at(dir),
        None => CacheRepository::at(config.resolve(&config.cache.target_dir())),
    };
    let mut locator =
        SourceLocator::from_config(&config.toolchain, &config.build.project_root);
    if let Some(dir) = &args.module_dir {
        locator = SourceLocator::new(dir, config.toolchain.source_extension.as_str());
        for (name, path) in &config.toolchain.aliases {
            locator = locator.with_alias(name.as_str(), path);
        }
    }
    let mode = if args.dry_run {
        ApplyMode::DryRun
    } else {
        ApplyMode::Execute
    };

    let report = RecompileOrchestrator::new(runner, &config.toolchain, &repository)
        .with_mode(mode)
        .apply(&plan, &locator, tag)?;

    println!();
    for module in &report.applied {
        match &module.stored {
            Some(stored) => println!(
                "{} {:<16} {} -> {}",
                "✓".green(),
                module.name,
                module.tier,
                stored.tiered_path.display()
            ),
            None => {
                println!("{} {:<16} {}", "·".cyan(), module.name, module.tier);
                for command in &module.commands {
                    println!("    {command}");
                }
            }
        }
    }
    for missing in &report.missing {
        println!("{} {missing}", "⚠".yellow());
    }
    println!(
        "\n{} modules {} into {} (tag `{tag}`), {} without source",
        report.applied_count(),
        if args.dry_run { "planned" } else { "cached" },
        repository.target_dir().display(),
        report.missing.len()
    );
    Ok(())
}

pub fn registry(args: &RegistryArgs, config: &PgoConfig) -> Result<()> {
    let repository = match &args.cache_dir {
        Some(dir) => CacheRepository::at(dir),
        None => CacheRepository::at(config.resolve(&config.cache.target_dir())),
    };
    let tag = args
        .profile_tag
        .as_deref()
        .unwrap_or(&config.cache.profile_tag);
    let emitter = match &args.output {
        Some(path) => RegistryEmitter::new(path, config.resolve(&config.registry.embed_dir)),
        None => RegistryEmitter::from_config(&config.registry, &config.build.project_root),
    };

    let registry = Registry::generate(&repository, tag)
        .with_context(|| format!("failed to generate registry for tag `{tag}`"))?;
    if registry.is_empty() {
        warn!(tag, dir = %repository.tag_dir(tag).display(), "no cached modules");
    }
    let emitted = emitter.write(&registry)?;

    for module in registry.modules() {
        let tier = module.tier.map_or_else(|| "active".to_string(), |tier| tier.to_string());
        println!("{:<16} {:>8} bytes  {tier}", module.name, module.size());
    }
    println!(
        "Wrote {} ({} modules)",
        emitted.registry_source.display(),
        registry.len()
    );
    Ok(())
}

pub fn wrap(args: &WrapArgs) -> Result<()> {
    let payload = fs::read(&args.input)
        .with_context(|| format!("input file not found: {}", args.input.display()))?;
    let wrapped = wrap_module(&payload, &args.name, &args.entry, args.opt, args.version)
        .with_context(|| format!("cannot wrap module `{}`", args.name))?;

    write_output(&args.output, &wrapped)?;
    info!(
        output = %args.output.display(),
        payload = payload.len(),
        "wrapped module"
    );
    println!(
        "{} {} ({}, {}, {} payload bytes)",
        "Wrapped".green(),
        args.output.display(),
        args.name,
        args.opt,
        payload.len()
    );
    Ok(())
}

pub fn inspect(args: &InspectArgs) -> Result<()> {
    let bytes =
        fs::read(&args.file).with_context(|| format!("failed to read {}", args.file.display()))?;
    let (header, payload) = unwrap_module(&bytes)
        .with_context(|| format!("{} is not a wrapped module", args.file.display()))?;

    println!("{}", args.file.display().to_string().bold());
    println!("  name:      {}", header.name);
    println!("  entry:     {}", header.entry);
    println!("  opt level: {}", header.opt_level);
    println!("  version:   {}", header.version);
    println!("  payload:   {} bytes", header.payload_size);
    println!("  sha1:      {}", fingerprint(payload));
    let trailing = bytes.len() - HEADER_SIZE - payload.len();
    if trailing > 0 {
        println!("  trailing:  {trailing} bytes ignored");
    }
    Ok(())
}

/// Modules worth shipping to the device: every non-cold entry of a plan
/// artifact, or of a plan built from a raw profile
fn sync_selection(input: &Path, config: &PgoConfig) -> Result<(Vec<String>, Option<String>)> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse JSON from {}", input.display()))?;

    if value.get("call_threshold").is_some() {
        let artifact = PlanArtifact::load(input)?;
        let modules = artifact
            .modules
            .into_iter()
            .filter(|entry| entry.suggested_opt > Tier::O0)
            .map(|entry| entry.name)
            .collect();
        return Ok((modules, artifact.profile_tag));
    }

    let profile = Profile::from_value(value, &input.display().to_string())?;
    let plan = PlanBuilder::new(config.thresholds.clone())
        .build(&profile, &input.display().to_string());
    let modules = plan
        .entries
        .iter()
        .filter(|entry| entry.tier > Tier::O0)
        .map(|entry| entry.name.clone())
        .collect();
    Ok((modules, profile.profile_tag))
}

pub fn sync_disk<R: ProcessRunner + ?Sized>(
    args: &SyncDiskArgs,
    config: &PgoConfig,
    runner: &mut R,
) -> Result<()> {
    let (modules, input_tag) = sync_selection(&args.input, config)?;
    let tag = args
        .profile_tag
        .clone()
        .or(input_tag)
        .unwrap_or_else(|| config.cache.profile_tag.clone());

    let repository = CacheRepository::at(config.resolve(&config.cache.target_dir()));
    let transport = match &args.disk {
        Some(image) => DiskTransport::new(
            config.disk.program.as_str(),
            image.clone(),
            config.disk.timeout(),
        ),
        None => DiskTransport::from_config(&config.disk, &config.build.project_root),
    };

    let planned = transport.plan_copies(modules.iter().map(String::as_str), &repository, &tag)?;
    for module in &planned.not_cached {
        println!("{} {module:<15} (not compiled yet)", "⚠".yellow());
    }
    println!("Found {} modules to sync", planned.planned.len());

    let mode = if args.dry_run {
        println!("Dry run - would sync:");
        for copy in &planned.planned {
            println!(
                "   {} -> {}::{}",
                copy.source.display(),
                transport.image().display(),
                copy.disk_name
            );
        }
        SyncMode::DryRun
    } else {
        SyncMode::Execute
    };

    let report = transport.sync(runner, planned, mode)?;
    if args.dry_run {
        return Ok(());
    }
    for module in &report.synced {
        println!("{} Synced {module}", "✓".green());
    }
    for (module, err) in &report.failed {
        println!("{} Failed to sync {module}: {err}", "✗".red());
    }
    println!(
        "{} synced, {} failed",
        report.synced.len(),
        report.failed.len()
    );
    if !report.is_success() {
        bail!(
            "{} of {} modules failed to sync to {}",
            report.failed.len(),
            report.planned.len(),
            transport.image().display()
        );
    }
    Ok(())
}

pub fn iterate<R: ProcessRunner + ?Sized>(
    args: &IterateArgs,
    config: &PgoConfig,
    runner: &mut R,
) -> Result<()> {
    let report = ConvergenceController::new(runner, config).run();
    report.print();

    let path: PathBuf = match &args.report_out {
        Some(path) => path.clone(),
        None => config.resolve(&config.convergence.report_path),
    };
    report.save(&path)?;
    println!("Full report saved to: {}", path.display());

    if !report.is_success() {
        bail!("PGO run {}", report.outcome);
    }
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
