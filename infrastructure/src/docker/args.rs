//! `docker` argument construction.
//!
//! Pure functions from a [`LaunchSpec`] to argv, so the hardening flags can
//! be checked without a daemon.

use toolcell_application::{Hardening, LaunchSpec, Mount, MountSource};

/// Arguments for `docker run -d ...`.
pub fn run_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["run".into(), "-d".into(), "--name".into(), spec.name.clone()];

    for (key, value) in &spec.labels {
        args.extend(["--label".into(), format!("{}={}", key, value)]);
    }

    if !spec.network {
        args.extend(["--network".into(), "none".into()]);
    }

    args.extend(hardening_args(&spec.hardening));

    if let Some(mb) = spec.memory_mb {
        let limit = format!("{}m", mb.ceil().max(6.0) as u64);
        args.extend(["--memory".into(), limit.clone(), "--memory-swap".into(), limit]);
    }
    if let Some(cpus) = spec.cpus {
        args.extend(["--cpus".into(), format_cpus(cpus)]);
    }

    if let Some(dir) = &spec.workdir {
        args.extend(["--workdir".into(), dir.clone()]);
    }
    for (key, value) in &spec.env {
        args.extend(["--env".into(), format!("{}={}", key, value)]);
    }
    for mount in &spec.mounts {
        args.extend(["--mount".into(), mount_arg(mount)]);
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

fn hardening_args(h: &Hardening) -> Vec<String> {
    let mut args = Vec::new();
    if h.read_only_root {
        args.push("--read-only".to_string());
    }
    if h.drop_all_capabilities {
        args.extend(["--cap-drop".to_string(), "ALL".to_string()]);
    }
    for cap in &h.add_capabilities {
        args.extend(["--cap-add".to_string(), cap.to_ascii_uppercase()]);
    }
    if h.no_new_privileges {
        args.extend(["--security-opt".to_string(), "no-new-privileges".to_string()]);
    }
    args.extend([
        "--pids-limit".to_string(),
        h.pids_limit.to_string(),
        "--ulimit".to_string(),
        format!("nofile={0}:{0}", h.nofile_limit),
        "--ulimit".to_string(),
        format!("nproc={0}:{0}", h.nproc_limit),
        "--tmpfs".to_string(),
        format!("/tmp:rw,noexec,nosuid,size={}m", h.tmpfs_size_mb),
    ]);
    if let Some(throttle) = &h.io_throttle {
        args.extend([
            "--device-read-bps".to_string(),
            format!("{}:{}", throttle.device, throttle.read_rate),
            "--device-write-bps".to_string(),
            format!("{}:{}", throttle.device, throttle.write_rate),
        ]);
    }
    if let Some(user) = &h.user {
        args.extend(["--user".to_string(), user.clone()]);
    }
    if let Some(bytes) = h.log_max_bytes {
        let kb = bytes.div_ceil(1024).max(1);
        args.extend([
            "--log-opt".to_string(),
            format!("max-size={}k", kb),
            "--log-opt".to_string(),
            "max-file=1".to_string(),
        ]);
    }
    args
}

fn mount_arg(mount: &Mount) -> String {
    let (kind, source) = match &mount.source {
        MountSource::HostPath(path) => ("bind", path.display().to_string()),
        MountSource::Volume(name) => ("volume", name.clone()),
    };
    let mut arg = format!("type={},source={},target={}", kind, source, mount.target);
    if mount.read_only {
        arg.push_str(",readonly");
    }
    arg
}

/// `--cpus` accepts at most two decimals.
fn format_cpus(cpus: f64) -> String {
    let rounded = (cpus.max(0.01) * 100.0).round() / 100.0;
    let s = format!("{:.2}", rounded);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Arguments for a short-lived helper container that mounts `volume` at
/// `/volume` and a host directory at `/host`, then runs `script` with `sh -c`.
pub fn helper_args(image: &str, volume: &str, host_dir: &str, host_read_only: bool, script: &str) -> Vec<String> {
    let host = Mount::host(host_dir, "/host", host_read_only);
    let vol = Mount::volume(volume, "/volume");
    vec![
        "run".into(),
        "--rm".into(),
        "--network".into(),
        "none".into(),
        "--mount".into(),
        mount_arg(&vol),
        "--mount".into(),
        mount_arg(&host),
        image.into(),
        "sh".into(),
        "-c".into(),
        script.into(),
    ]
}
