//! Relocatable decoder bundles: the decoder binary plus the shared libraries
//! it links against, flattened into one tar archive so it can be shipped to
//! machines without a system installation.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::decoder::DEFAULT_ARCHIVE;
use crate::error::{ExtractError, Result};

/// Bundle `binary` (looked up like the process manager does, with `PATH`
/// replaced by `search_path` when given) and its shared libraries into
/// `out_dir/ffmpegbin.tar`. Returns the archive path.
pub fn package_binary(
    binary: &Path,
    search_path: Option<&Path>,
    out_dir: &Path,
) -> Result<PathBuf> {
    let program = match search_path {
        Some(dir) => which::which_in(binary, Some(dir), env::current_dir()?),
        None => which::which(binary),
    }
    .map_err(|e| ExtractError::Package(format!("{} not installed: {e}", binary.display())))?;

    let mut members = shared_libraries(&program)?;
    members.push(program.clone());
    info!(?program, libraries = members.len() - 1, "packaging decoder");

    fs::create_dir_all(out_dir)?;
    let archive = out_dir.join(DEFAULT_ARCHIVE);

    // One `-C <dir> <name>` pair per member keeps the archive flat.
    let mut command = Command::new("tar");
    command.arg("-chf").arg(&archive);
    for member in &members {
        let (Some(dir), Some(name)) = (member.parent(), member.file_name()) else {
            continue;
        };
        command.arg("-C").arg(dir).arg(name);
    }
    run(&mut command, "tar")?;

    info!(?archive, "decoder archive written");
    Ok(archive)
}

/// Extract `archive` into `target_dir`, creating the directory if needed.
///
/// Extracted files are stamped with the extraction time, not the times stored
/// in the archive, so [`needs_unpack`] sees them as fresh afterwards.
pub fn unpack(archive: &Path, target_dir: &Path) -> Result<()> {
    fs::create_dir_all(target_dir)?;
    info!(?archive, ?target_dir, "unpacking decoder archive");
    run(
        Command::new("tar")
            .arg("-xmf")
            .arg(archive)
            .arg("-C")
            .arg(target_dir),
        "tar",
    )
}

/// Whether the unpacked `binary` is missing or older than `archive`.
pub fn needs_unpack(binary: &Path, archive: &Path) -> io::Result<bool> {
    if !binary.exists() {
        return Ok(true);
    }
    let unpacked = fs::metadata(binary)?.modified()?;
    let packed = fs::metadata(archive)?.modified()?;
    Ok(unpacked < packed)
}

/// Resolved shared-library paths of `program`, as reported by `ldd`.
///
/// Static executables and scripts have none; `ldd` rejects them with
/// "not a dynamic executable", which is not an error here.
fn shared_libraries(program: &Path) -> Result<Vec<PathBuf>> {
    let output = Command::new("ldd")
        .arg(program)
        .output()
        .map_err(|e| ExtractError::Package(format!("failed to run ldd: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(?program, reason = %stderr.trim(), "ldd listed no libraries, packaging the binary alone");
        return Ok(Vec::new());
    }
    Ok(parse_ldd(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_ldd(listing: &str) -> Vec<PathBuf> {
    listing
        .lines()
        .filter_map(|line| {
            let target = match line.split_once("=>") {
                Some((_, target)) => target,
                None => line,
            };
            let path = target.split_whitespace().next()?;
            path.starts_with('/').then(|| PathBuf::from(path))
        })
        .inspect(|path| debug!(?path, "decoder dependency"))
        .collect()
}

fn run(command: &mut Command, name: &str) -> Result<()> {
    let output = command
        .output()
        .map_err(|e| ExtractError::Package(format!("failed to run {name}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::Package(format!(
            "{name} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn parse_ldd_keeps_resolved_paths() {
        let listing = "\
\tlinux-vdso.so.1 (0x00007ffd1a9e0000)
\tlibavcodec.so.58 => /usr/lib/x86_64-linux-gnu/libavcodec.so.58 (0x00007f0c1c000000)
\tlibmissing.so.1 => not found
\t/lib64/ld-linux-x86-64.so.2 (0x00007f0c1e400000)
";
        assert_eq!(
            parse_ldd(listing),
            vec![
                PathBuf::from("/usr/lib/x86_64-linux-gnu/libavcodec.so.58"),
                PathBuf::from("/lib64/ld-linux-x86-64.so.2"),
            ]
        );
    }

    #[test]
    fn needs_unpack_when_binary_missing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ffmpegbin.tar");
        File::create(&archive).unwrap();
        assert!(needs_unpack(&dir.path().join("ffmpeg"), &archive).unwrap());
    }

    #[test]
    fn needs_unpack_follows_modification_times() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ffmpegbin.tar");
        let binary = dir.path().join("ffmpeg");
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let new = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000);

        File::create(&archive).unwrap().set_modified(new).unwrap();
        File::create(&binary).unwrap().set_modified(old).unwrap();
        assert!(needs_unpack(&binary, &archive).unwrap());

        File::options()
            .write(true)
            .open(&binary)
            .unwrap()
            .set_modified(new + Duration::from_secs(1))
            .unwrap();
        assert!(!needs_unpack(&binary, &archive).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unpacked_archive_is_fresh() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        fs::create_dir(&bin_dir).unwrap();
        let script = bin_dir.join("ffmpeg");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        // Old enough that a restored archive timestamp would look stale.
        File::options()
            .write(true)
            .open(&script)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000))
            .unwrap();

        let out_dir = dir.path().join("out");
        let archive = package_binary(Path::new("ffmpeg"), Some(&bin_dir), &out_dir).unwrap();
        assert_eq!(archive, out_dir.join(DEFAULT_ARCHIVE));

        let target = dir.path().join("ffmpegbin");
        unpack(&archive, &target).unwrap();
        let unpacked = target.join("ffmpeg");
        assert!(unpacked.is_file());
        assert!(!needs_unpack(&unpacked, &archive).unwrap());
    }

    #[test]
    fn package_reports_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = package_binary(Path::new("ffmpeg"), Some(dir.path()), dir.path()).unwrap_err();
        assert!(matches!(err, ExtractError::Package(_)));
    }
}
