use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("connect timed out")]
    ConnectTimeout,

    #[error("connection refused")]
    ConnectRefused,

    #[error("no local IPv4 address found")]
    NoLocalIpv4,

    #[error("libusb unavailable")]
    LibusbUnavailable,

    #[error("USB device not found")]
    DeviceNotFound,

    #[error("failed to claim USB interface: {0}")]
    ClaimFailed(String),

    #[error("USB bulk transfer failed: {0}")]
    BulkTransferError(String),

    #[error("partial USB transfer: wrote {written} of {total} bytes")]
    PartialTransfer { written: usize, total: usize },

    #[error("USB device busy (likely claimed by the OS)")]
    DeviceBusy,

    #[error("failed to write config: {0}")]
    ConfigWriteError(String),

    #[error("lan target missing ip")]
    NoLanIp,

    #[error("osPrinter target missing printerName")]
    NoPrinterName,

    #[error("unrecognized target type: {0}")]
    UnknownTarget(String),

    #[error("OS print failed: {0}")]
    OsPrintError(String),

    #[error("unsupported platform")]
    Unsupported,

    #[error("job payload exceeds the size limit")]
    PayloadTooLarge,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
