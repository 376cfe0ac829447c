//! `invsync devices|interfaces|tenants|nms-enrich|lookup` — fetch listings, build the
//! run's indexes and caches, drive a [`Reconciler`] and report.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use invsync_client::api::{Device, Label, Scalar};
use invsync_client::nms::NmsDevice;
use invsync_client::target::DeviceDefaults;
use invsync_client::{
    Credentials, DeviceTarget, Executor, InterfaceTarget, NetboxClient, NmsClient, NmsTarget, TargetClient,
};
use invsync_config::{ColorMode as ConfigColorMode, DeviceSettings, LabelSettings};
use invsync_recon::labels::ColorMode;
use invsync_recon::model::{RecordResult, SourceRecord, TargetId};
use invsync_recon::{
    consolidate, ApiError, Feed, LabelCache, Palette, Reconciler, RunAborted, RunSummary, SiteCache,
    SyncError, SyncProfile, TargetIndex, UnifiedRecord,
};

use crate::exit_codes::{api_exit_code, EXIT_AUTH, EXIT_MISSING_CREDENTIALS, EXIT_NOT_FOUND, EXIT_OUTPUT};
use crate::{resolve_secret, CliError, Context, RunArgs, ENV_NETBOX_TOKEN, ENV_NETBOX_URL};

pub const DEVICE_COLUMNS: &[&str] = &["device_name", "ip_address", "site"];

// ── Profiles ────────────────────────────────────────────────────────

fn device_profile() -> SyncProfile {
    SyncProfile {
        secondary_field: Some("ip_address".into()),
        required_fields: vec!["ip_address".into(), "site".into()],
        tracked_fields: vec!["ip_address".into(), "site".into()],
        label_fields: vec!["role".into(), "lane".into(), "function".into(), "type".into()],
        dependency_field: Some("site".into()),
        ..SyncProfile::new("devices", "device_name")
    }
}

fn interface_profile() -> SyncProfile {
    SyncProfile {
        secondary_field: Some("ifindex".into()),
        required_fields: vec!["device_id".into(), "ifindex".into()],
        tracked_fields: vec![
            "ifindex".into(),
            "speed".into(),
            "type".into(),
            "description".into(),
            "ip".into(),
            "netmask".into(),
        ],
        ..SyncProfile::new("interfaces", "ifDescr")
    }
}

fn tenant_profile() -> SyncProfile {
    SyncProfile {
        secondary_field: Some("ip_address".into()),
        label_fields: vec!["tenant".into()],
        create_missing: false,
        ..SyncProfile::new("tenants", "name")
    }
}

fn nms_profile() -> SyncProfile {
    SyncProfile {
        required_fields: vec!["device_id".into()],
        tracked_fields: vec![
            "plan_id".into(),
            "snmp_community".into(),
            "snmp_ip".into(),
            "minimize_snmp".into(),
        ],
        create_missing: false,
        ..SyncProfile::new("nms-enrich", "device_id")
    }
}

// ── devices ─────────────────────────────────────────────────────────

pub fn cmd_devices(ctx: &Context, csv: &Path, pause: Duration, run: &RunArgs) -> Result<(), CliError> {
    let rows = crate::sources::read_csv(csv, DEVICE_COLUMNS)?;
    let client = TargetClient::new(ctx.target_executor()?);

    let sites = listing("site", client.list_sites())?;
    let labels = listing("label", client.list_labels())?;
    let devices = listing("device", client.list_devices())?;

    let site_names: HashMap<String, String> = sites
        .iter()
        .map(|s| (s.id.as_str().to_string(), s.title.clone()))
        .collect();
    let index = device_index(devices, &site_names, ctx.settings.domain_suffix());
    let label_cache = LabelCache::new(
        labels.into_iter().map(Label::into_record).collect(),
        palette(&ctx.settings.labels),
        ctx.settings.labels.description.clone(),
    );
    let site_cache = SiteCache::new(sites.into_iter().map(|s| (s.title, TargetId::from(&s.id))));

    let records = consolidate(&[Feed::new("csv", &["device_name"], rows)]);
    log::info!("devices: {} source records, {} target devices", records.len(), index.len());

    let target = DeviceTarget::new(&client, device_defaults(&ctx.settings.defaults));
    let mut reconciler = Reconciler::new(device_profile(), index, target)
        .with_labels(label_cache)
        .with_sites(site_cache)
        .dry_run(run.dry_run)
        .pause(pause);

    finish(reconciler.run(&records), run)
}

// ── interfaces ──────────────────────────────────────────────────────

pub fn cmd_interfaces(ctx: &Context, interfaces: &Path, ips: &Path, run: &RunArgs) -> Result<(), CliError> {
    let interface_rows = crate::sources::read_json_lines(interfaces)?;
    let ip_rows = crate::sources::read_json_lines(ips)?;

    let records = consolidate(&[
        Feed::new("interfaces", &["device_name", "ifindex"], interface_rows),
        Feed::new("ips", &["device_name", "ifindex"], ip_rows),
    ]);

    let client = TargetClient::new(ctx.target_executor()?);
    let mut summary = RunSummary::new("interfaces", run.dry_run);

    for (device_id, batch) in group_by_device(records) {
        let Some(device_id) = device_id else {
            for record in batch {
                let gap = SyncError::ValidationGap { field: "device_id".into() };
                summary.push(RecordResult::skipped(record.key.to_string(), None).with_reason(gap.to_string()));
            }
            continue;
        };

        let listed = match client.list_interfaces(&device_id) {
            Ok(listed) => listed,
            Err(err) if err.is_fatal() => {
                report(&summary, run)?;
                return Err(api_error(&err, "interface listing"));
            }
            // One device's listing failing only fails that device's records.
            Err(err) => {
                log::warn!("device {}: cannot list interfaces: {}", device_id, err);
                for record in batch {
                    summary.push(RecordResult::failed(
                        record.key.to_string(),
                        format!("interface listing failed: {err}"),
                    ));
                }
                continue;
            }
        };

        let index = TargetIndex::build(listed.into_iter().map(|i| i.into_target()).collect(), None);
        log::info!("device {}: {} records, {} target interfaces", device_id, batch.len(), index.len());

        let target = InterfaceTarget::new(&client, device_id);
        let mut reconciler = Reconciler::new(interface_profile(), index, target).dry_run(run.dry_run);
        match reconciler.run(&batch) {
            Ok(partial) => summary.absorb(partial),
            Err(aborted) => {
                summary.absorb(aborted.summary);
                report(&summary, run)?;
                return Err(aborted_error(&aborted.key, &aborted.error));
            }
        }
    }

    report(&summary, run)
}

/// Records grouped by `device_id`, in first-seen order. Records without a
/// device id land under `None`.
fn group_by_device(records: Vec<UnifiedRecord>) -> Vec<(Option<TargetId>, Vec<UnifiedRecord>)> {
    let mut groups: Vec<(Option<TargetId>, Vec<UnifiedRecord>)> = Vec::new();
    let mut slots: HashMap<Option<String>, usize> = HashMap::new();

    for record in records {
        let id = record.value("device_id").map(str::to_string);
        let slot = *slots.entry(id.clone()).or_insert_with(|| {
            groups.push((id.map(TargetId::new), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record);
    }
    groups
}

// ── tenants ─────────────────────────────────────────────────────────

pub fn cmd_tenants(
    ctx: &Context,
    netbox_url: Option<String>,
    netbox_token: Option<String>,
    run: &RunArgs,
) -> Result<(), CliError> {
    let url = netbox_url
        .or_else(|| std::env::var(ENV_NETBOX_URL).ok())
        .or_else(|| ctx.settings.netbox.base_url.clone())
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            CliError::new(EXIT_MISSING_CREDENTIALS, "missing NetBox URL")
                .with_hint(format!("use --netbox-url, set {ENV_NETBOX_URL}, or [netbox] base_url"))
        })?;
    let token = resolve_secret(netbox_token, "NetBox token", "--netbox-token", ENV_NETBOX_TOKEN)?;

    let netbox = NetboxClient::new(Executor::new(&url, Credentials::Token(token), ctx.policy()));
    let client = TargetClient::new(ctx.target_executor()?);

    let tenants = listing("NetBox tenant", netbox.tenants())?;
    let mut rows = Vec::new();
    for tenant in &tenants {
        let devices = listing("NetBox device", netbox.devices_for_tenant(tenant))?;
        log::debug!("tenant '{}': {} devices", tenant.name, devices.len());
        for device in devices {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), device.name.clone().unwrap_or_default());
            fields.insert("tenant".to_string(), tenant.name.clone());
            if let Some(ip) = device.primary_address() {
                fields.insert("ip_address".to_string(), ip.to_string());
            }
            rows.push(SourceRecord::new(fields));
        }
    }

    let labels = listing("label", client.list_labels())?;
    let devices = listing("device", client.list_devices())?;
    let index = device_index(devices, &HashMap::new(), ctx.settings.domain_suffix());

    let settings = &ctx.settings.labels;
    let label_cache = LabelCache::new(
        labels.into_iter().map(Label::into_record).collect(),
        Palette::new(vec![settings.tenant_color.clone()], ColorMode::RoundRobin),
        settings.tenant_description.clone(),
    );

    // A device can sit in several tenants; each pairing is its own record
    // so every tenant label gets attached.
    let records = consolidate(&[Feed::new("netbox", &["name", "tenant"], rows)]);
    log::info!(
        "tenants: {} tenants, {} source devices, {} target devices",
        tenants.len(),
        records.len(),
        index.len()
    );

    let target = DeviceTarget::new(&client, device_defaults(&ctx.settings.defaults));
    let mut reconciler = Reconciler::new(tenant_profile(), index, target)
        .with_labels(label_cache)
        .dry_run(run.dry_run);

    finish(reconciler.run(&records), run)
}

// ── nms-enrich ──────────────────────────────────────────────────────

pub fn cmd_nms_enrich(
    ctx: &Context,
    nms_url: Option<String>,
    pause: Duration,
    run: &RunArgs,
) -> Result<(), CliError> {
    let url = nms_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| ctx.settings.nms.base_url.clone());
    let client = NmsClient::new(ctx.executor_at(&url)?);
    let devices = listing("NMS device", client.list_devices())?;

    let mut summary = RunSummary::new("nms-enrich", run.dry_run);
    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for device in devices {
        match nms_enrichment(&device, &ctx.settings.defaults) {
            Some(row) => {
                rows.push(row);
                targets.extend(device.into_target());
            }
            None => {
                let name = device.display_name();
                log::warn!("NMS device '{}' has no id, skipped", name);
                summary.push(RecordResult::skipped(name, None).with_reason("no device id"));
            }
        }
    }

    let records = consolidate(&[Feed::new("nms", &["device_id"], rows)]);
    log::info!("nms-enrich: {} devices from {}", records.len() + summary.skipped, url);

    let mut reconciler = Reconciler::new(nms_profile(), TargetIndex::build(targets, None), NmsTarget::new(&client))
        .dry_run(run.dry_run)
        .pause(pause);

    let result = match reconciler.run(&records) {
        Ok(done) => {
            summary.absorb(done);
            Ok(summary)
        }
        Err(mut aborted) => {
            summary.absorb(aborted.summary);
            aborted.summary = summary;
            Err(aborted)
        }
    };
    finish(result, run)
}

/// What an enriched device should look like: its own plan and community
/// when it has them, else `[defaults]`; SNMP polled on its first sending
/// address when no SNMP address is set.
fn nms_enrichment(device: &NmsDevice, defaults: &DeviceSettings) -> Option<SourceRecord> {
    let id = device.id()?;
    let listed = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

    let mut fields = BTreeMap::new();
    fields.insert("device_id".to_string(), id.to_string());
    let plan = listed(device.plan_id.as_ref().map(Scalar::as_str)).or_else(|| defaults.plan_id.map(|p| p.to_string()));
    if let Some(plan) = plan {
        fields.insert("plan_id".to_string(), plan);
    }
    let community = listed(device.device_snmp_community.as_deref()).or_else(|| listed(Some(defaults.snmp_community.as_str())));
    if let Some(community) = community {
        fields.insert("snmp_community".to_string(), community);
    }
    if let Some(ip) = device.snmp_ip() {
        fields.insert("snmp_ip".to_string(), ip.to_string());
    }
    fields.insert("minimize_snmp".to_string(), "false".to_string());
    Some(SourceRecord::new(fields))
}

// ── lookup ──────────────────────────────────────────────────────────

pub fn cmd_lookup(ctx: &Context, name: &str, json: bool) -> Result<(), CliError> {
    if name.trim().is_empty() {
        return Err(CliError::args("device name or id must not be blank"));
    }
    let client = TargetClient::new(ctx.target_executor()?);

    let device = client
        .lookup_device(name)
        .map_err(|e| api_error(&e, "device lookup"))?
        .ok_or_else(|| CliError::new(EXIT_NOT_FOUND, format!("device '{}' not found", name.trim())))?;

    let record = device.into_target(&HashMap::new());
    let attr = |k: &str| record.attributes.get(k).cloned().unwrap_or_default();

    if json {
        let labels: Vec<&str> = record.labels.iter().map(|l| l.name.as_str()).collect();
        let value = serde_json::json!({
            "id": record.id,
            "name": record.name,
            "ip_address": attr("ip_address"),
            "site": attr("site"),
            "site_id": attr("site_id"),
            "labels": labels,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    } else {
        println!("{}\t{}\t{}\t{}", record.id, record.name, attr("ip_address"), attr("site"));
    }
    Ok(())
}

// ── Shared ──────────────────────────────────────────────────────────

fn device_index(devices: Vec<Device>, site_names: &HashMap<String, String>, suffix: Option<&str>) -> TargetIndex {
    TargetIndex::build(devices.into_iter().map(|d| d.into_target(site_names)).collect(), suffix)
}

fn device_defaults(settings: &DeviceSettings) -> DeviceDefaults {
    DeviceDefaults {
        subtype: settings.subtype.clone(),
        sample_rate: settings.sample_rate,
        bgp_type: settings.bgp_type.clone(),
        plan_id: settings.plan_id,
        snmp_community: settings.snmp_community.clone(),
        minimize_snmp: settings.minimize_snmp,
        site_type: settings.site_type.clone(),
        description: settings.description.clone(),
    }
}

fn palette(settings: &LabelSettings) -> Palette {
    let mode = match settings.color_mode {
        ConfigColorMode::Random => ColorMode::Random,
        ConfigColorMode::RoundRobin => ColorMode::RoundRobin,
    };
    Palette::new(settings.palette.clone(), mode)
}

/// Initial listings: without them nothing can be matched, so any failure
/// stops the command.
fn listing<T>(what: &str, result: Result<T, ApiError>) -> Result<T, CliError> {
    result.map_err(|e| api_error(&e, &format!("{what} listing")))
}

fn api_error(err: &ApiError, context: &str) -> CliError {
    let error = CliError::new(api_exit_code(err), format!("{context} failed: {err}"));
    if err.is_fatal() {
        error.with_hint("check the credentials and [target] auth mode")
    } else {
        error
    }
}

fn aborted_error(key: &str, err: &ApiError) -> CliError {
    CliError::new(EXIT_AUTH, format!("run aborted at '{key}': {err}"))
        .with_hint("check the credentials and [target] auth mode")
}

fn finish(result: Result<RunSummary, RunAborted>, run: &RunArgs) -> Result<(), CliError> {
    match result {
        Ok(summary) => report(&summary, run),
        Err(aborted) => {
            report(&aborted.summary, run)?;
            Err(aborted_error(&aborted.key, &aborted.error))
        }
    }
}

/// JSON to `--output` / stdout, human summary to stderr.
fn report(summary: &RunSummary, run: &RunArgs) -> Result<(), CliError> {
    if run.json || run.output.is_some() {
        let json_str = serde_json::to_string_pretty(summary)
            .map_err(|e| CliError::new(EXIT_OUTPUT, format!("JSON serialization error: {e}")))?;

        if let Some(ref path) = run.output {
            std::fs::write(path, &json_str)
                .map_err(|e| CliError::new(EXIT_OUTPUT, format!("cannot write output: {e}")))?;
            eprintln!("wrote {}", path.display());
        }
        if run.json {
            println!("{json_str}");
        }
    }

    eprintln!(
        "{}{}: {} created, {} updated, {} skipped, {} failed",
        summary.meta.profile,
        if summary.meta.dry_run { " (dry run)" } else { "" },
        summary.created,
        summary.updated,
        summary.skipped,
        summary.failed,
    );
    for failure in &summary.failures {
        eprintln!("  failed {}: {}", failure.key, failure.reason);
    }
    Ok(())
}
