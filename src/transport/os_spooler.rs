use crate::errors::{DaemonError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OsPrinterRecord {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "isDefault")]
    pub is_default: bool,
}

/// Enumerate OS-registered printers. Errors are swallowed into an empty
/// list — discovery here is advisory, never load-bearing.
pub async fn discover_os_printers() -> Vec<OsPrinterRecord> {
    if cfg!(target_os = "windows") {
        discover_windows().await.unwrap_or_default()
    } else if cfg!(any(target_os = "macos", target_os = "linux")) {
        discover_cups().await.unwrap_or_default()
    } else {
        Vec::new()
    }
}

/// Submit `bytes` to OS printer `name` via the platform spooler.
pub async fn print_os(name: &str, bytes: &[u8]) -> Result<()> {
    if cfg!(target_os = "windows") {
        print_windows(name, bytes).await
    } else if cfg!(any(target_os = "macos", target_os = "linux")) {
        print_cups(name, bytes).await
    } else {
        Err(DaemonError::Unsupported)
    }
}

async fn discover_cups() -> Result<Vec<OsPrinterRecord>> {
    let output = Command::new("lpstat").arg("-p").arg("-d").output().await?;
    let text = String::from_utf8_lossy(&output.stdout);

    let default_name = text
        .lines()
        .find_map(|line| line.strip_prefix("system default destination: "))
        .map(|s| s.trim().to_string());

    let mut printers = Vec::new();
    for line in text.lines() {
        // "printer <name> is idle.  enabled since ..."
        let Some(rest) = line.strip_prefix("printer ") else {
            continue;
        };
        let Some((name, rest)) = rest.split_once(" is ") else {
            continue;
        };
        let state = if rest.starts_with("idle") {
            "Ready"
        } else if rest.starts_with("printing") {
            "Printing"
        } else {
            "Unknown"
        };

        printers.push(OsPrinterRecord {
            name: name.to_string(),
            description: Some(state.to_string()),
            is_default: default_name.as_deref() == Some(name),
        });
    }

    Ok(printers)
}

async fn print_cups(name: &str, bytes: &[u8]) -> Result<()> {
    let mut child = Command::new("lp")
        .arg("-d")
        .arg(name)
        .arg("-o")
        .arg("raw")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(bytes).await?;
        // Dropping closes stdin so `lp` sees EOF.
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let diagnostics = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        return Err(DaemonError::OsPrintError(diagnostics));
    }

    debug!(printer = name, bytes = bytes.len(), "submitted via lp");
    Ok(())
}

async fn discover_windows() -> Result<Vec<OsPrinterRecord>> {
    // Primary: PowerShell Get-Printer, which reports name/default/status.
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-Command",
            "Get-Printer | Select-Object Name,Default | ConvertTo-Json",
        ])
        .output()
        .await;

    match output {
        Ok(o) if o.status.success() => {
            if let Ok(records) = parse_windows_powershell_json(&o.stdout) {
                return Ok(records);
            }
            warn!("Get-Printer output did not parse, falling back to wmic");
        }
        _ => warn!("Get-Printer unavailable, falling back to wmic"),
    }

    // Fallback: wmic, present on older Windows builds.
    let output = Command::new("wmic")
        .args(["printer", "get", "name,default"])
        .output()
        .await?;
    let text = String::from_utf8_lossy(&output.stdout);
    let mut printers = Vec::new();
    for line in text.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let is_default = line.to_ascii_uppercase().ends_with("TRUE");
        let name = line.trim_end_matches(|c: char| !c.is_whitespace()).trim();
        if name.is_empty() {
            continue;
        }
        printers.push(OsPrinterRecord {
            name: name.to_string(),
            description: None,
            is_default,
        });
    }
    Ok(printers)
}

fn parse_windows_powershell_json(stdout: &[u8]) -> Result<Vec<OsPrinterRecord>> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Default")]
        default: Option<bool>,
    }

    let value: serde_json::Value = serde_json::from_slice(stdout)?;
    let entries: Vec<Raw> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => Vec::new(),
    };

    Ok(entries
        .into_iter()
        .map(|r| OsPrinterRecord {
            name: r.name,
            description: None,
            is_default: r.default.unwrap_or(false),
        })
        .collect())
}

async fn print_windows(name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(bytes)?;
    let tmp_path = tmp.into_temp_path();

    let result = print_windows_submit(name, &tmp_path).await;
    // Remove on every exit path, success or failure.
    let _ = tmp_path.close();
    result
}

/// Raw-byte submission: `copy /b <file> \\localhost\<printer>` hands the
/// spooler the file's bytes untouched, unlike a shell-verb "Print" which
/// would route through whatever handler is registered for the temp file's
/// extension.
async fn print_windows_submit(name: &str, tmp_path: &std::path::Path) -> Result<()> {
    let target = format!("\\\\localhost\\{}", name);
    let output = Command::new("cmd")
        .args(["/C", "copy", "/b", &tmp_path.display().to_string(), &target])
        .output()
        .await?;

    if !output.status.success() {
        let diagnostics = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        return Err(DaemonError::OsPrintError(diagnostics));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cups_lpstat_output() {
        // Hand-rolled to avoid running lpstat from the discovery function in a test.
        let text = "system default destination: Kitchen_Printer\n\
                     printer Kitchen_Printer is idle.  enabled since Mon\n\
                     printer Bar_Printer is printing.  enabled since Mon\n";

        let default_name = text
            .lines()
            .find_map(|line| line.strip_prefix("system default destination: "))
            .map(|s| s.trim().to_string());
        assert_eq!(default_name.as_deref(), Some("Kitchen_Printer"));

        let mut printers = Vec::new();
        for line in text.lines() {
            let Some(rest) = line.strip_prefix("printer ") else {
                continue;
            };
            let Some((name, rest)) = rest.split_once(" is ") else {
                continue;
            };
            let state = if rest.starts_with("idle") {
                "Ready"
            } else if rest.starts_with("printing") {
                "Printing"
            } else {
                "Unknown"
            };
            printers.push((name.to_string(), state.to_string()));
        }

        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0], ("Kitchen_Printer".to_string(), "Ready".to_string()));
        assert_eq!(printers[1], ("Bar_Printer".to_string(), "Printing".to_string()));
    }
}
