use crate::errors::{DaemonError, Result};
use rusb::{Context, UsbContext};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const USB_CLASS_PRINTER: u8 = 0x07;
const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;
const ENDPOINT_DIR_IN_BIT: u8 = 0x80;
const ENDPOINT_ATTR_TYPE_MASK: u8 = 0x03;
const ENDPOINT_ATTR_TYPE_BULK: u8 = 0x02;
const BULK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsbInterfaceRecord {
    #[serde(rename = "interfaceNumber")]
    pub interface_number: u8,
    #[serde(rename = "outEndpoint")]
    pub out_endpoint: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsbDeviceRecord {
    #[serde(rename = "vendorId")]
    pub vendor_id: u16,
    #[serde(rename = "productId")]
    pub product_id: u16,
    #[serde(rename = "vendorName")]
    pub vendor_name: Option<String>,
    #[serde(rename = "productName")]
    pub product_name: Option<String>,
    #[serde(rename = "serialNumber")]
    pub serial_number: Option<String>,
    #[serde(rename = "busNumber")]
    pub bus_number: u8,
    #[serde(rename = "deviceAddress")]
    pub device_address: u8,
    pub interfaces: Vec<UsbInterfaceRecord>,
}

#[derive(Debug, Clone)]
pub struct UsbPrintTarget {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: Option<u8>,
    pub device_address: Option<u8>,
    pub interface_number: u8,
    pub out_endpoint: u8,
}

/// Walk the raw configuration-descriptor byte block of a device, finding the
/// first bulk-OUT endpoint for every interface of class `printer` (0x07).
///
/// This parses the byte stream directly rather than relying on `rusb`'s
/// decoded `ConfigDescriptor`/`Interface`/`EndpointDescriptor` structs, per
/// the requirement to avoid padding/alignment hazards in decoded descriptor
/// structs. Each record starts with `bLength` then `bDescriptorType`; a
/// record that claims to extend past the buffer, or whose `bLength` is
/// smaller than the 2-byte header, terminates the walk rather than panicking
/// on an out-of-bounds slice index.
fn find_printer_bulk_out_endpoints(raw: &[u8]) -> Vec<UsbInterfaceRecord> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut current_interface: Option<(u8, bool)> = None; // (number, is_printer_class)
    let mut found_for_current = false;

    while offset + 2 <= raw.len() {
        let b_length = raw[offset] as usize;
        let b_descriptor_type = raw[offset + 1];

        if b_length < 2 || offset + b_length > raw.len() {
            break;
        }

        match b_descriptor_type {
            DESCRIPTOR_TYPE_INTERFACE if b_length >= 9 => {
                let interface_number = raw[offset + 2];
                let interface_class = raw[offset + 5];
                current_interface = Some((interface_number, interface_class == USB_CLASS_PRINTER));
                found_for_current = false;
            }
            DESCRIPTOR_TYPE_ENDPOINT if b_length >= 7 => {
                if let Some((interface_number, is_printer)) = current_interface {
                    if is_printer && !found_for_current {
                        let endpoint_address = raw[offset + 2];
                        let attributes = raw[offset + 3];
                        let is_out = endpoint_address & ENDPOINT_DIR_IN_BIT == 0;
                        let is_bulk = attributes & ENDPOINT_ATTR_TYPE_MASK == ENDPOINT_ATTR_TYPE_BULK;

                        if is_out && is_bulk {
                            records.push(UsbInterfaceRecord {
                                interface_number,
                                out_endpoint: endpoint_address,
                            });
                            found_for_current = true;
                        }
                    }
                }
            }
            _ => {}
        }

        offset += b_length;
    }

    records
}

fn fetch_raw_config_descriptor(handle: &rusb::DeviceHandle<Context>) -> Result<Vec<u8>> {
    // Standard GET_DESCRIPTOR request for the configuration descriptor,
    // recipient=device, type=CONFIGURATION (0x02), index 0.
    const REQUEST_TYPE_IN: u8 = 0x80;
    const GET_DESCRIPTOR: u8 = 0x06;
    const DESCRIPTOR_TYPE_CONFIGURATION: u16 = 0x02;

    // First read just the 9-byte header to learn wTotalLength.
    let mut header = [0u8; 9];
    handle
        .read_control(
            REQUEST_TYPE_IN,
            GET_DESCRIPTOR,
            DESCRIPTOR_TYPE_CONFIGURATION << 8,
            0,
            &mut header,
            BULK_TIMEOUT,
        )
        .map_err(DaemonError::Usb)?;

    let total_length = u16::from_le_bytes([header[2], header[3]]) as usize;
    let mut buf = vec![0u8; total_length.max(header.len())];
    handle
        .read_control(
            REQUEST_TYPE_IN,
            GET_DESCRIPTOR,
            DESCRIPTOR_TYPE_CONFIGURATION << 8,
            0,
            &mut buf,
            BULK_TIMEOUT,
        )
        .map_err(DaemonError::Usb)?;

    Ok(buf)
}

fn probe_libusb() -> Result<Context> {
    Context::new().map_err(|_| DaemonError::LibusbUnavailable)
}

/// Enumerate all USB devices, returning one record per device that has at
/// least one printer-class interface with a bulk-OUT endpoint.
pub fn discover_usb() -> Result<Vec<UsbDeviceRecord>> {
    let context = probe_libusb()?;
    let devices = context.devices().map_err(DaemonError::Usb)?;

    let mut records = Vec::new();

    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };

        let bus_number = device.bus_number();
        let device_address = device.address();

        let interfaces = match device.open() {
            Ok(handle) => match fetch_raw_config_descriptor(&handle) {
                Ok(raw) => find_printer_bulk_out_endpoints(&raw),
                Err(e) => {
                    warn!(
                        vendor_id = descriptor.vendor_id(),
                        product_id = descriptor.product_id(),
                        "failed to read configuration descriptor: {}",
                        e
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        if interfaces.is_empty() {
            continue;
        }

        let (vendor_name, product_name, serial_number) = match device.open() {
            Ok(handle) => {
                let timeout = Duration::from_millis(200);
                let languages = handle.read_languages(timeout).unwrap_or_default();
                let language = languages.first().copied();
                let vendor_name = language
                    .and_then(|lang| handle.read_manufacturer_string(lang, &descriptor, timeout).ok());
                let product_name = language
                    .and_then(|lang| handle.read_product_string(lang, &descriptor, timeout).ok());
                let serial_number = language.and_then(|lang| {
                    handle.read_serial_number_string(lang, &descriptor, timeout).ok()
                });
                (vendor_name, product_name, serial_number)
            }
            Err(_) => (None, None, None),
        };

        records.push(UsbDeviceRecord {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            vendor_name,
            product_name,
            serial_number,
            bus_number,
            device_address,
            interfaces,
        });
    }

    debug!(count = records.len(), "USB discovery complete");
    Ok(records)
}

/// Print `bytes` to the USB device/interface/endpoint described by `target`.
pub fn print_usb(target: &UsbPrintTarget, bytes: &[u8]) -> Result<()> {
    let context = probe_libusb()?;
    let devices = context.devices().map_err(DaemonError::Usb)?;

    let mut selected = None;
    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() != target.vendor_id || descriptor.product_id() != target.product_id
        {
            continue;
        }
        if let Some(bus) = target.bus_number {
            if device.bus_number() != bus {
                continue;
            }
        }
        if let Some(addr) = target.device_address {
            if device.address() != addr {
                continue;
            }
        }
        selected = Some(device);
        break;
    }

    let device = selected.ok_or(DaemonError::DeviceNotFound)?;
    let mut handle = device.open().map_err(DaemonError::Usb)?;

    let _ = handle.set_auto_detach_kernel_driver(true);
    if handle.kernel_driver_active(target.interface_number).unwrap_or(false) {
        let _ = handle.detach_kernel_driver(target.interface_number);
    }

    match handle.set_active_configuration(1) {
        Ok(()) | Err(rusb::Error::Busy) => {}
        Err(e) => warn!("set_active_configuration best-effort failed: {}", e),
    }

    handle
        .claim_interface(target.interface_number)
        .map_err(|e| {
            let _ = handle.attach_kernel_driver(target.interface_number);
            DaemonError::ClaimFailed(e.to_string())
        })?;

    let result = handle.write_bulk(target.out_endpoint, bytes, BULK_TIMEOUT);

    let _ = handle.release_interface(target.interface_number);
    let _ = handle.attach_kernel_driver(target.interface_number);

    match result {
        Ok(written) if written == bytes.len() => {
            debug!(bytes = written, "USB bulk write complete");
            Ok(())
        }
        Ok(written) => Err(DaemonError::PartialTransfer {
            written,
            total: bytes.len(),
        }),
        Err(rusb::Error::Busy) => Err(DaemonError::DeviceBusy),
        Err(e) => Err(DaemonError::BulkTransferError(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface_descriptor(number: u8, class: u8) -> Vec<u8> {
        vec![9, DESCRIPTOR_TYPE_INTERFACE, number, 0, 1, class, 0, 0, 0]
    }

    fn endpoint_descriptor(address: u8, attributes: u8) -> Vec<u8> {
        vec![7, DESCRIPTOR_TYPE_ENDPOINT, address, attributes, 0, 0, 0]
    }

    #[test]
    fn finds_bulk_out_on_printer_class_interface() {
        let mut raw = Vec::new();
        raw.extend(interface_descriptor(0, USB_CLASS_PRINTER));
        raw.extend(endpoint_descriptor(0x01, ENDPOINT_ATTR_TYPE_BULK)); // OUT
        raw.extend(endpoint_descriptor(0x81, ENDPOINT_ATTR_TYPE_BULK)); // IN, skipped

        let records = find_printer_bulk_out_endpoints(&raw);
        assert_eq!(records, vec![UsbInterfaceRecord { interface_number: 0, out_endpoint: 0x01 }]);
    }

    #[test]
    fn ignores_non_printer_interfaces() {
        let mut raw = Vec::new();
        raw.extend(interface_descriptor(0, 0x08)); // mass storage
        raw.extend(endpoint_descriptor(0x01, ENDPOINT_ATTR_TYPE_BULK));

        assert!(find_printer_bulk_out_endpoints(&raw).is_empty());
    }

    #[test]
    fn ignores_non_bulk_endpoints() {
        let mut raw = Vec::new();
        raw.extend(interface_descriptor(0, USB_CLASS_PRINTER));
        raw.extend(endpoint_descriptor(0x01, 0x03)); // interrupt, not bulk

        assert!(find_printer_bulk_out_endpoints(&raw).is_empty());
    }

    #[test]
    fn multiple_interfaces_each_contribute_one_endpoint() {
        let mut raw = Vec::new();
        raw.extend(interface_descriptor(0, USB_CLASS_PRINTER));
        raw.extend(endpoint_descriptor(0x01, ENDPOINT_ATTR_TYPE_BULK));
        raw.extend(interface_descriptor(1, USB_CLASS_PRINTER));
        raw.extend(endpoint_descriptor(0x02, ENDPOINT_ATTR_TYPE_BULK));

        let records = find_printer_bulk_out_endpoints(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].interface_number, 0);
        assert_eq!(records[1].interface_number, 1);
    }

    #[test]
    fn truncated_descriptor_stops_without_panicking() {
        let mut raw = interface_descriptor(0, USB_CLASS_PRINTER);
        raw.push(7); // dangling bLength claiming 7 more bytes that don't exist
        raw.push(DESCRIPTOR_TYPE_ENDPOINT);

        // Must not panic; truncated record is simply not walked further.
        let records = find_printer_bulk_out_endpoints(&raw);
        assert!(records.is_empty());
    }

    #[test]
    fn zero_length_record_terminates_walk() {
        let raw = vec![0, DESCRIPTOR_TYPE_INTERFACE];
        assert!(find_printer_bulk_out_endpoints(&raw).is_empty());
    }
}
