pub mod os_spooler;
pub mod tcp;
pub mod usb;
