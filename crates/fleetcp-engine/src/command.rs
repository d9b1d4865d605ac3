//! Copy/move/delete command construction
//!
//! The per-item command for a transfer is selected by (topology, source
//! OS, target OS) through an explicit lookup, keeping the nine-combination
//! matrix exhaustive and testable without running anything. Builders are
//! pure: they return what to run and where to run it.
//!
//! Tool conventions throughout: in-place whole-file writes, no
//! compression, no permission/ownership/timestamp propagation for
//! directories, and a fixed per-invocation time ceiling. Cross-OS cases
//! pick which side drives the tool; when the source is Windows and the
//! target is POSIX, the pull runs on the target so its native rsync does
//! the work.

use fleetcp_config::ServerDescriptor;
use fleetcp_remote::shell_quote;
use fleetcp_types::{path, OsKind, Topology, TransferIntent};

/// SSH transport options shared by every rsync invocation: a LAN-oriented
/// cipher set, no transport compression, relaxed host-key checking, and
/// connection multiplexing to amortize handshakes.
pub const RSYNC_SSH_BASE: &str = "ssh -o Compression=no -o Ciphers=aes128-ctr \
-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null \
-o MACs=umac-64@openssh.com -o ControlMaster=auto -o ControlPersist=300 \
-o ControlPath=/tmp/fleetcp-ssh-%r@%h:%p";

/// One endpoint of a transfer: the control host itself, or a registered
/// remote server.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// The control host the engine runs on (POSIX)
    Local,
    /// A registered remote server
    Remote(ServerDescriptor),
}

impl Endpoint {
    /// OS family of the endpoint
    pub fn os(&self) -> OsKind {
        match self {
            Self::Local => OsKind::Posix,
            Self::Remote(server) => server.os,
        }
    }

    /// Address of the endpoint, for same-host checks
    pub fn address(&self) -> &str {
        match self {
            Self::Local => "localhost",
            Self::Remote(server) => &server.address,
        }
    }

    /// The descriptor, when the endpoint is remote
    pub fn descriptor(&self) -> Option<&ServerDescriptor> {
        match self {
            Self::Local => None,
            Self::Remote(server) => Some(server),
        }
    }
}

/// Where and what to run for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRun {
    /// argv spawned as a local subprocess on the control host
    Local(Vec<String>),
    /// Shell line executed on the named host over a pooled session
    Remote {
        /// Host name or address to run on
        host: String,
        /// The shell command line
        command: String,
    },
    /// Source and destination are the same path; success without any
    /// OS call
    NoOp,
}

/// A built command plus whether it already performed the move itself
/// (`mv`/`Move-Item` style), so finalizing must not delete the source
/// again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    /// What to run and where
    pub run: CommandRun,
    /// True when the command moves rather than copies
    pub moves_source: bool,
}

impl BuiltCommand {
    fn copy(run: CommandRun) -> Self {
        Self {
            run,
            moves_source: false,
        }
    }

    fn moving(run: CommandRun) -> Self {
        Self {
            run,
            moves_source: true,
        }
    }
}

/// Everything a builder needs to know about one item
#[derive(Debug)]
pub struct ItemPlan<'a> {
    /// Source endpoint
    pub source: &'a Endpoint,
    /// Target endpoint
    pub target: &'a Endpoint,
    /// Item path on the source host
    pub source_path: &'a str,
    /// Destination directory on the target host
    pub dest_path: &'a str,
    /// Display name of the item
    pub item_name: &'a str,
    /// Whether the item is a directory
    pub is_dir: bool,
    /// Copy or move
    pub intent: TransferIntent,
    /// Whether to ask rsync for machine-readable progress
    pub progress: bool,
}

/// Builder function selected from the command matrix
pub type BuilderFn = fn(&ItemPlan<'_>) -> BuiltCommand;

/// Select the command builder for a (topology, source OS, target OS)
/// combination. Total over all inputs.
pub fn builder_for(topology: Topology, source_os: OsKind, target_os: OsKind) -> BuilderFn {
    use OsKind::{Posix, Windows};
    use Topology::{LocalToLocal, LocalToRemote, RemoteToLocal, RemoteToRemote};

    match (topology, source_os, target_os) {
        // The control host is POSIX; OS kinds cannot vary here
        (LocalToLocal, _, _) => build_local_to_local,
        // Push from the control host; Windows targets only differ in
        // destination path spelling
        (LocalToRemote, _, Posix) | (LocalToRemote, _, Windows) => build_local_to_remote,
        // Pull to the control host; a Windows source is addressed through
        // its Cygwin path so the local rsync drives the transfer
        (RemoteToLocal, Posix, _) | (RemoteToLocal, Windows, _) => build_remote_to_local,
        // Windows source, POSIX target: the pull runs on the target
        (RemoteToRemote, Windows, Posix) => build_remote_pull_on_target,
        // Everything else pushes from the source host
        (RemoteToRemote, Posix, _) | (RemoteToRemote, Windows, Windows) => {
            build_remote_push_on_source
        }
    }
}

/// Build the command for one item, including the same-host fast path for
/// `remote_to_remote` transfers whose endpoints are one machine.
pub fn build_item_command(topology: Topology, plan: &ItemPlan<'_>) -> BuiltCommand {
    if topology == Topology::RemoteToRemote && plan.source.address() == plan.target.address() {
        return build_same_host(plan);
    }
    builder_for(topology, plan.source.os(), plan.target.os())(plan)
}

/// rsync option set shared by all invocations
pub fn rsync_opts(source_os: OsKind, target_os: OsKind, progress: bool) -> Vec<String> {
    let mut opts: Vec<String> = [
        "-a",
        "--inplace",
        "--whole-file",
        "--no-compress",
        "--numeric-ids",
        "--timeout=600",
        "-s",
        "--no-perms",
        "--no-owner",
        "--no-group",
        "--omit-dir-times",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect();
    if source_os.is_windows() || target_os.is_windows() {
        opts.push("--iconv=UTF-8,UTF-8".to_string());
    }
    if progress {
        opts.push("--info=progress2".to_string());
    }
    opts
}

/// SSH transport command for `-e`, with the port appended when nonstandard
fn ssh_transport(server: &ServerDescriptor) -> String {
    if server.port() == 22 {
        RSYNC_SSH_BASE.to_string()
    } else {
        format!("{} -p {}", RSYNC_SSH_BASE, server.port())
    }
}

/// Path as the remote rsync endpoint spells it: Cygwin form for Windows
fn rsync_remote_path(server: &ServerDescriptor, p: &str) -> String {
    if server.os.is_windows() {
        path::to_remote_tool_path(&path::normalize_windows_path(p), OsKind::Windows)
    } else {
        p.to_string()
    }
}

/// Source and destination arguments for one item: directories transfer
/// contents-into-name, files transfer into the destination directory.
fn item_src_dst(plan: &ItemPlan<'_>, src: &str, dst_dir: &str) -> (String, String) {
    if plan.is_dir {
        (
            format!("{}/", src.trim_end_matches('/')),
            format!("{}/{}/", dst_dir.trim_end_matches('/'), plan.item_name),
        )
    } else {
        (src.to_string(), format!("{}/", dst_dir.trim_end_matches('/')))
    }
}

fn build_local_to_local(plan: &ItemPlan<'_>) -> BuiltCommand {
    if plan.intent == TransferIntent::Move {
        let dest = format!("{}/", plan.dest_path.trim_end_matches('/'));
        if path::parent_dir(plan.source_path, OsKind::Posix)
            == plan.dest_path.trim_end_matches('/')
        {
            return BuiltCommand::moving(CommandRun::NoOp);
        }
        return BuiltCommand::moving(CommandRun::Local(vec![
            "mv".to_string(),
            "-f".to_string(),
            plan.source_path.to_string(),
            dest,
        ]));
    }
    let argv = if plan.is_dir {
        vec![
            "cp".to_string(),
            "-r".to_string(),
            plan.source_path.to_string(),
            format!("{}/", plan.dest_path.trim_end_matches('/')),
        ]
    } else {
        vec![
            "cp".to_string(),
            "-f".to_string(),
            plan.source_path.to_string(),
            format!("{}/{}", plan.dest_path.trim_end_matches('/'), plan.item_name),
        ]
    };
    BuiltCommand::copy(CommandRun::Local(argv))
}

fn build_local_to_remote(plan: &ItemPlan<'_>) -> BuiltCommand {
    let Some(target) = plan.target.descriptor() else {
        // Target claimed remote but has no descriptor; treat as local copy
        return build_local_to_local(plan);
    };
    let dest_dir = rsync_remote_path(target, plan.dest_path);
    let (src, dst) = item_src_dst(plan, plan.source_path, &dest_dir);

    let mut argv = Vec::new();
    if let Some(password) = &target.password {
        argv.extend(["sshpass".to_string(), "-p".to_string(), password.clone()]);
    }
    argv.push("rsync".to_string());
    argv.extend(rsync_opts(plan.source.os(), target.os, plan.progress));
    argv.extend(["-e".to_string(), ssh_transport(target)]);
    argv.push(src);
    argv.push(format!("{}@{}:{}", target.user, target.address, dst));
    BuiltCommand::copy(CommandRun::Local(argv))
}

fn build_remote_to_local(plan: &ItemPlan<'_>) -> BuiltCommand {
    let Some(source) = plan.source.descriptor() else {
        return build_local_to_local(plan);
    };
    let src_path = rsync_remote_path(source, plan.source_path);
    let (src, dst) = item_src_dst(plan, &src_path, plan.dest_path);

    let mut argv = Vec::new();
    if let Some(password) = &source.password {
        argv.extend(["sshpass".to_string(), "-p".to_string(), password.clone()]);
    }
    argv.push("rsync".to_string());
    argv.extend(rsync_opts(source.os, plan.target.os(), plan.progress));
    argv.extend(["-e".to_string(), ssh_transport(source)]);
    argv.push(format!("{}@{}:{}", source.user, source.address, src));
    argv.push(dst);
    BuiltCommand::copy(CommandRun::Local(argv))
}

/// Push rsync executed on the source host, addressing the target
fn build_remote_push_on_source(plan: &ItemPlan<'_>) -> BuiltCommand {
    let (Some(source), Some(target)) = (plan.source.descriptor(), plan.target.descriptor()) else {
        return build_local_to_local(plan);
    };
    let src_path = rsync_remote_path(source, plan.source_path);
    let dest_dir = rsync_remote_path(target, plan.dest_path);
    let (src, dst) = item_src_dst(plan, &src_path, &dest_dir);

    let opts = rsync_opts(source.os, target.os, plan.progress).join(" ");
    let remote_dest = format!("{}@{}:{}", target.user, target.address, dst);
    let mut command = String::new();
    if let Some(password) = &target.password {
        command.push_str(&format!("sshpass -p {} ", shell_quote(password)));
    }
    command.push_str(&format!(
        "rsync {} -e {} {} {}",
        opts,
        shell_quote(&ssh_transport(target)),
        shell_quote(&src),
        shell_quote(&remote_dest),
    ));
    BuiltCommand::copy(CommandRun::Remote {
        host: source.address.clone(),
        command,
    })
}

/// Pull rsync executed on the target host, addressing a Windows source
/// through its Cygwin path
fn build_remote_pull_on_target(plan: &ItemPlan<'_>) -> BuiltCommand {
    let (Some(source), Some(target)) = (plan.source.descriptor(), plan.target.descriptor()) else {
        return build_local_to_local(plan);
    };
    let src_path = rsync_remote_path(source, plan.source_path);
    let (src, dst) = item_src_dst(plan, &src_path, plan.dest_path);

    let opts = rsync_opts(source.os, target.os, plan.progress).join(" ");
    let remote_src = format!("{}@{}:{}", source.user, source.address, src);
    let mut command = String::new();
    if let Some(password) = &source.password {
        command.push_str(&format!("sshpass -p {} ", shell_quote(password)));
    }
    command.push_str(&format!(
        "rsync {} -e {} {} {}",
        opts,
        shell_quote(&ssh_transport(source)),
        shell_quote(&remote_src),
        shell_quote(&dst),
    ));
    BuiltCommand::copy(CommandRun::Remote {
        host: target.address.clone(),
        command,
    })
}

/// Same machine on both ends: native copy/move commands, no rsync
fn build_same_host(plan: &ItemPlan<'_>) -> BuiltCommand {
    let Some(server) = plan.source.descriptor() else {
        return build_local_to_local(plan);
    };
    let host = server.address.clone();

    if server.os.is_windows() {
        let src = path::normalize_for_shell(plan.source_path, OsKind::Windows);
        let dst_dir = path::normalize_for_shell(plan.dest_path, OsKind::Windows);
        let dst = format!("{}\\{}", dst_dir.trim_end_matches('\\'), plan.item_name);
        if path::normalize_windows_path(plan.source_path)
            == path::normalize_windows_path(&format!("{}/{}", plan.dest_path, plan.item_name))
        {
            return BuiltCommand::moving(CommandRun::NoOp);
        }
        if plan.intent == TransferIntent::Move {
            let ps_src = src.replace('\'', "''");
            let ps_dst = dst.replace('\'', "''");
            let script = format!(
                "$src='{}';$dst='{}';\
                 if(Test-Path -LiteralPath $dst){{Remove-Item -LiteralPath $dst -Force -Recurse -ErrorAction SilentlyContinue}};\
                 Move-Item -LiteralPath $src -Destination $dst -Force -ErrorAction Stop",
                ps_src, ps_dst
            );
            return BuiltCommand::moving(CommandRun::Remote {
                host,
                command: format!("powershell -NoProfile -Command \"{}\"", script),
            });
        }
        let command = if plan.is_dir {
            format!("xcopy \"{}\" \"{}\" /E /I /Y /Q", src, dst)
        } else {
            format!("copy /Y \"{}\" \"{}\"", src, dst)
        };
        return BuiltCommand::copy(CommandRun::Remote { host, command });
    }

    if plan.source_path.trim_end_matches('/')
        == format!("{}/{}", plan.dest_path.trim_end_matches('/'), plan.item_name)
    {
        return BuiltCommand::moving(CommandRun::NoOp);
    }
    let dest = format!("{}/", plan.dest_path.trim_end_matches('/'));
    if plan.intent == TransferIntent::Move {
        return BuiltCommand::moving(CommandRun::Remote {
            host,
            command: format!(
                "mv -f {} {}",
                shell_quote(plan.source_path),
                shell_quote(&dest)
            ),
        });
    }
    let command = if plan.is_dir {
        format!(
            "cp -r {} {}",
            shell_quote(plan.source_path),
            shell_quote(&dest)
        )
    } else {
        format!(
            "cp -f {} {}",
            shell_quote(plan.source_path),
            shell_quote(&format!("{}{}", dest, plan.item_name))
        )
    };
    BuiltCommand::copy(CommandRun::Remote { host, command })
}

/// One multi-source rsync invocation for a batchable item set.
///
/// Callers have already verified applicability (remote topology, distinct
/// hosts, shared parent, two or more items).
pub fn build_batch_command(
    topology: Topology,
    source: &Endpoint,
    target: &Endpoint,
    item_paths: &[String],
    dest_path: &str,
    progress: bool,
) -> Option<BuiltCommand> {
    match topology {
        Topology::LocalToRemote => {
            let server = target.descriptor()?;
            let dest_dir = rsync_remote_path(server, dest_path);
            let mut argv = Vec::new();
            if let Some(password) = &server.password {
                argv.extend(["sshpass".to_string(), "-p".to_string(), password.clone()]);
            }
            argv.push("rsync".to_string());
            argv.extend(rsync_opts(source.os(), server.os, progress));
            argv.extend(["-e".to_string(), ssh_transport(server)]);
            argv.extend(item_paths.iter().cloned());
            argv.push(format!(
                "{}@{}:{}/",
                server.user,
                server.address,
                dest_dir.trim_end_matches('/')
            ));
            Some(BuiltCommand::copy(CommandRun::Local(argv)))
        }
        Topology::RemoteToLocal => {
            let server = source.descriptor()?;
            let mut argv = Vec::new();
            if let Some(password) = &server.password {
                argv.extend(["sshpass".to_string(), "-p".to_string(), password.clone()]);
            }
            argv.push("rsync".to_string());
            argv.extend(rsync_opts(server.os, target.os(), progress));
            argv.extend(["-e".to_string(), ssh_transport(server)]);
            for item in item_paths {
                argv.push(format!(
                    "{}@{}:{}",
                    server.user,
                    server.address,
                    rsync_remote_path(server, item)
                ));
            }
            argv.push(format!("{}/", dest_path.trim_end_matches('/')));
            Some(BuiltCommand::copy(CommandRun::Local(argv)))
        }
        Topology::RemoteToRemote => {
            let source_server = source.descriptor()?;
            let target_server = target.descriptor()?;
            let opts = rsync_opts(source_server.os, target_server.os, progress).join(" ");
            if source_server.os.is_windows() && !target_server.os.is_windows() {
                // Pull on the target, multi-source
                let sources = item_paths
                    .iter()
                    .map(|p| {
                        shell_quote(&format!(
                            "{}@{}:{}",
                            source_server.user,
                            source_server.address,
                            rsync_remote_path(source_server, p)
                        ))
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                let mut command = String::new();
                if let Some(password) = &source_server.password {
                    command.push_str(&format!("sshpass -p {} ", shell_quote(password)));
                }
                command.push_str(&format!(
                    "rsync {} -e {} {} {}",
                    opts,
                    shell_quote(&ssh_transport(source_server)),
                    sources,
                    shell_quote(&format!("{}/", dest_path.trim_end_matches('/'))),
                ));
                Some(BuiltCommand::copy(CommandRun::Remote {
                    host: target_server.address.clone(),
                    command,
                }))
            } else {
                // Push on the source, multi-source
                let sources = item_paths
                    .iter()
                    .map(|p| shell_quote(&rsync_remote_path(source_server, p)))
                    .collect::<Vec<_>>()
                    .join(" ");
                let dest_dir = rsync_remote_path(target_server, dest_path);
                let dest = format!(
                    "{}@{}:{}/",
                    target_server.user,
                    target_server.address,
                    dest_dir.trim_end_matches('/')
                );
                let mut command = String::new();
                if let Some(password) = &target_server.password {
                    command.push_str(&format!("sshpass -p {} ", shell_quote(password)));
                }
                command.push_str(&format!(
                    "rsync {} -e {} {} {}",
                    opts,
                    shell_quote(&ssh_transport(target_server)),
                    sources,
                    shell_quote(&dest),
                ));
                Some(BuiltCommand::copy(CommandRun::Remote {
                    host: source_server.address.clone(),
                    command,
                }))
            }
        }
        Topology::LocalToLocal => None,
    }
}

/// Escape a literal for single-quoted PowerShell strings
fn pwsh_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// POSIX delete pair: the elevated variant to try first and the plain
/// fallback.
pub fn build_posix_delete(paths: &[String]) -> (String, String) {
    let quoted = paths
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ");
    (
        format!("sudo -n rm -rf -- {}", quoted),
        format!("rm -rf -- {}", quoted),
    )
}

/// PowerShell script deleting a batch of paths, emitting the failed subset
/// as compact JSON on stdout and exiting nonzero when any path survives.
pub fn build_windows_delete_script(paths: &[String]) -> String {
    let items = paths
        .iter()
        .map(|p| {
            format!(
                "'{}'",
                pwsh_literal(&path::normalize_for_shell(p, OsKind::Windows))
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    let script = format!(
        "$failed=@();$paths=@({});\
         foreach($p in $paths){{\
           if(Test-Path -LiteralPath $p){{\
             $err='';\
             try{{ Remove-Item -LiteralPath $p -Force -Recurse -ErrorAction Stop }}catch{{ $err=$_.Exception.Message }}\
             if(Test-Path -LiteralPath $p){{\
               if([string]::IsNullOrEmpty($err)){{ $err='delete failed' }}\
               $failed += [pscustomobject]@{{path=$p; error=$err}}\
             }}\
           }}\
         }}\
         if($failed.Count -gt 0){{ $failed | ConvertTo-Json -Compress; exit 1 }}\
         exit 0",
        items
    );
    format!("powershell -NoProfile -Command \"{}\"", script)
}

/// Per-path Windows delete fallback used when the batch script fails
pub fn build_windows_delete_single(p: &str) -> String {
    let ps_path = pwsh_literal(&path::normalize_for_shell(p, OsKind::Windows));
    format!(
        "powershell -NoProfile -Command \
         \"Remove-Item -LiteralPath '{}' -Force -Recurse -ErrorAction SilentlyContinue; \
         if (Test-Path -LiteralPath '{}') {{ exit 1 }}\"",
        ps_path, ps_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posix_server(name: &str, address: &str) -> ServerDescriptor {
        ServerDescriptor {
            name: name.to_string(),
            address: address.to_string(),
            user: "ops".to_string(),
            password: Some("pw".to_string()),
            key_path: None,
            os: OsKind::Posix,
            port: None,
            default_path: None,
        }
    }

    fn windows_server(name: &str, address: &str) -> ServerDescriptor {
        ServerDescriptor {
            os: OsKind::Windows,
            ..posix_server(name, address)
        }
    }

    #[test]
    fn test_matrix_is_total() {
        use OsKind::{Posix, Windows};
        for topology in [
            Topology::LocalToLocal,
            Topology::LocalToRemote,
            Topology::RemoteToLocal,
            Topology::RemoteToRemote,
        ] {
            for src in [Posix, Windows] {
                for tgt in [Posix, Windows] {
                    let _ = builder_for(topology, src, tgt);
                }
            }
        }
    }

    #[test]
    fn test_local_to_remote_push() {
        let source = Endpoint::Local;
        let target = Endpoint::Remote(posix_server("lin01", "10.20.0.5"));
        let plan = ItemPlan {
            source: &source,
            target: &target,
            source_path: "/srv/data/a.bin",
            dest_path: "/backup",
            item_name: "a.bin",
            is_dir: false,
            intent: TransferIntent::Copy,
            progress: true,
        };
        let built = build_item_command(Topology::LocalToRemote, &plan);
        let CommandRun::Local(argv) = built.run else {
            panic!("expected local argv");
        };
        assert_eq!(&argv[..3], &["sshpass", "-p", "pw"]);
        assert!(argv.contains(&"rsync".to_string()));
        assert!(argv.contains(&"--inplace".to_string()));
        assert!(argv.contains(&"--info=progress2".to_string()));
        assert_eq!(argv.last().unwrap(), "ops@10.20.0.5:/backup/");
        assert!(!built.moves_source);
    }

    #[test]
    fn test_windows_target_gets_cygwin_dest_and_iconv() {
        let source = Endpoint::Local;
        let target = Endpoint::Remote(windows_server("win01", "10.20.0.7"));
        let plan = ItemPlan {
            source: &source,
            target: &target,
            source_path: "/srv/data/a.bin",
            dest_path: "C:\\incoming",
            item_name: "a.bin",
            is_dir: false,
            intent: TransferIntent::Copy,
            progress: false,
        };
        let built = build_item_command(Topology::LocalToRemote, &plan);
        let CommandRun::Local(argv) = built.run else {
            panic!("expected local argv");
        };
        assert!(argv.contains(&"--iconv=UTF-8,UTF-8".to_string()));
        assert_eq!(argv.last().unwrap(), "ops@10.20.0.7:/cygdrive/c/incoming/");
    }

    #[test]
    fn test_windows_source_posix_target_pulls_on_target() {
        let source = Endpoint::Remote(windows_server("win01", "10.20.0.7"));
        let target = Endpoint::Remote(posix_server("lin01", "10.20.0.5"));
        let plan = ItemPlan {
            source: &source,
            target: &target,
            source_path: "C:/Users/ops/logs",
            dest_path: "/backup",
            item_name: "logs",
            is_dir: true,
            intent: TransferIntent::Copy,
            progress: false,
        };
        let built = build_item_command(Topology::RemoteToRemote, &plan);
        let CommandRun::Remote { host, command } = built.run else {
            panic!("expected remote command");
        };
        assert_eq!(host, "10.20.0.5");
        assert!(command.contains("ops@10.20.0.7:/cygdrive/c/Users/ops/logs/"));
        assert!(command.ends_with(" /backup/logs/"));
    }

    #[test]
    fn test_remote_to_remote_pushes_on_source() {
        let source = Endpoint::Remote(posix_server("lin01", "10.20.0.5"));
        let target = Endpoint::Remote(posix_server("lin02", "10.20.0.6"));
        let plan = ItemPlan {
            source: &source,
            target: &target,
            source_path: "/srv/data/a.bin",
            dest_path: "/backup",
            item_name: "a.bin",
            is_dir: false,
            intent: TransferIntent::Copy,
            progress: false,
        };
        let built = build_item_command(Topology::RemoteToRemote, &plan);
        let CommandRun::Remote { host, command } = built.run else {
            panic!("expected remote command");
        };
        assert_eq!(host, "10.20.0.5");
        assert!(command.starts_with("sshpass -p pw rsync"));
        assert!(command.contains("ops@10.20.0.6:"));
    }

    #[test]
    fn test_same_host_posix_move_and_noop() {
        let server = Endpoint::Remote(posix_server("lin01", "10.20.0.5"));
        let plan = ItemPlan {
            source: &server,
            target: &server,
            source_path: "/srv/data/a.bin",
            dest_path: "/srv/archive",
            item_name: "a.bin",
            is_dir: false,
            intent: TransferIntent::Move,
            progress: false,
        };
        let built = build_item_command(Topology::RemoteToRemote, &plan);
        assert!(built.moves_source);
        let CommandRun::Remote { command, .. } = built.run else {
            panic!("expected remote command");
        };
        assert_eq!(command, "mv -f /srv/data/a.bin /srv/archive/");

        let noop_plan = ItemPlan {
            dest_path: "/srv/data",
            ..plan
        };
        let built = build_item_command(Topology::RemoteToRemote, &noop_plan);
        assert_eq!(built.run, CommandRun::NoOp);
    }

    #[test]
    fn test_same_host_windows_dir_copy() {
        let server = Endpoint::Remote(windows_server("win01", "10.20.0.7"));
        let plan = ItemPlan {
            source: &server,
            target: &server,
            source_path: "C:/Users/ops/logs",
            dest_path: "D:/archive",
            item_name: "logs",
            is_dir: true,
            intent: TransferIntent::Copy,
            progress: false,
        };
        let built = build_item_command(Topology::RemoteToRemote, &plan);
        let CommandRun::Remote { command, .. } = built.run else {
            panic!("expected remote command");
        };
        assert_eq!(
            command,
            "xcopy \"C:\\Users\\ops\\logs\" \"D:\\archive\\logs\" /E /I /Y /Q"
        );
    }

    #[test]
    fn test_batch_local_to_remote_lists_every_source() {
        let source = Endpoint::Local;
        let target = Endpoint::Remote(posix_server("lin01", "10.20.0.5"));
        let items = vec![
            "/srv/data/a.bin".to_string(),
            "/srv/data/b.bin".to_string(),
            "/srv/data/c.bin".to_string(),
        ];
        let built =
            build_batch_command(Topology::LocalToRemote, &source, &target, &items, "/backup", false)
                .unwrap();
        let CommandRun::Local(argv) = built.run else {
            panic!("expected local argv");
        };
        for item in &items {
            assert!(argv.contains(item));
        }
        assert_eq!(argv.last().unwrap(), "ops@10.20.0.5:/backup/");
    }

    #[test]
    fn test_batch_never_applies_to_local_to_local() {
        let source = Endpoint::Local;
        let target = Endpoint::Local;
        assert!(build_batch_command(
            Topology::LocalToLocal,
            &source,
            &target,
            &["a".to_string(), "b".to_string()],
            "/dest",
            false
        )
        .is_none());
    }

    #[test]
    fn test_posix_delete_pair() {
        let (elevated, plain) = build_posix_delete(&[
            "/srv/data/a.bin".to_string(),
            "/srv/old dir".to_string(),
        ]);
        assert_eq!(elevated, "sudo -n rm -rf -- /srv/data/a.bin '/srv/old dir'");
        assert_eq!(plain, "rm -rf -- /srv/data/a.bin '/srv/old dir'");
    }

    #[test]
    fn test_windows_delete_script_collects_failures() {
        let script = build_windows_delete_script(&["C:/tmp/a".to_string()]);
        assert!(script.starts_with("powershell -NoProfile -Command"));
        assert!(script.contains("'C:\\tmp\\a'"));
        assert!(script.contains("ConvertTo-Json -Compress"));
        assert!(script.contains("exit 1"));
    }
}
