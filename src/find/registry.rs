//! Registry enumeration
//!
//! Installers record their directories as the default value of one subkey
//! per installed version:
//!
//! ```text
//! HKCU|HKLM\Software\ActiveState\ActiveTcl
//!     8.6.13.0   (default) = C:\ActiveTcl
//!     9.0.0.0    (default) = C:\Tcl90
//! ```
//!
//! Off the windowing family there is no registry and every lookup is empty.

use std::io;
use std::path::PathBuf;

use crate::platform::RegistryHive;

/// Well-known vendor key searched in both hives.
pub const VENDOR_KEY: &str = r"Software\ActiveState\ActiveTcl";

/// Default values of the immediate subkeys of `key`, in enumeration order.
///
/// A missing key is not an error and yields an empty list.
#[cfg(windows)]
pub fn subkey_default_values(hive: RegistryHive, key: &str) -> io::Result<Vec<PathBuf>> {
    imp::subkey_default_values(hive, key)
}

#[cfg(not(windows))]
pub fn subkey_default_values(_hive: RegistryHive, _key: &str) -> io::Result<Vec<PathBuf>> {
    Ok(Vec::new())
}

#[cfg(windows)]
mod imp {
    use std::ffi::OsString;
    use std::io;
    use std::os::windows::ffi::{OsStrExt, OsStringExt};
    use std::path::PathBuf;
    use std::ptr;

    use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS};
    use windows_sys::Win32::System::Registry::{
        RegCloseKey, RegEnumKeyExW, RegGetValueW, RegOpenKeyExW, HKEY, HKEY_CURRENT_USER,
        HKEY_LOCAL_MACHINE,
        KEY_READ, RRF_RT_REG_SZ,
    };

    use crate::platform::RegistryHive;

    /// Longest key name the registry allows, plus the terminator.
    const MAX_KEY_NAME: usize = 256;

    struct OpenKey(HKEY);

    impl Drop for OpenKey {
        fn drop(&mut self) {
            unsafe {
                RegCloseKey(self.0);
            }
        }
    }

    fn wide(text: &str) -> Vec<u16> {
        std::ffi::OsStr::new(text).encode_wide().chain(Some(0)).collect()
    }

    fn check(code: u32) -> io::Result<()> {
        if code == ERROR_SUCCESS {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(code as i32))
        }
    }

    pub fn subkey_default_values(hive: RegistryHive, key: &str) -> io::Result<Vec<PathBuf>> {
        let root = match hive {
            RegistryHive::CurrentUser => HKEY_CURRENT_USER,
            RegistryHive::LocalMachine => HKEY_LOCAL_MACHINE,
        };
        let key_name = wide(key);
        let mut handle: HKEY = ptr::null_mut();
        let code = unsafe { RegOpenKeyExW(root, key_name.as_ptr(), 0, KEY_READ, &mut handle) };
        if code == ERROR_FILE_NOT_FOUND {
            return Ok(Vec::new());
        }
        check(code)?;
        let key = OpenKey(handle);

        let mut dirs = Vec::new();
        let mut index = 0u32;
        loop {
            let mut name = [0u16; MAX_KEY_NAME];
            let mut len = MAX_KEY_NAME as u32;
            let code = unsafe {
                RegEnumKeyExW(
                    key.0,
                    index,
                    name.as_mut_ptr(),
                    &mut len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            if code == ERROR_NO_MORE_ITEMS {
                break;
            }
            check(code)?;
            index += 1;

            let mut subkey = name[..len as usize].to_vec();
            subkey.push(0);
            if let Some(dir) = default_value(&key, &subkey)? {
                dirs.push(dir);
            }
        }
        Ok(dirs)
    }

    fn default_value(key: &OpenKey, subkey: &[u16]) -> io::Result<Option<PathBuf>> {
        let mut size = 0u32;
        let code = unsafe {
            RegGetValueW(
                key.0,
                subkey.as_ptr(),
                ptr::null(),
                RRF_RT_REG_SZ,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut size,
            )
        };
        if code == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        check(code)?;

        let mut data = vec![0u16; (size as usize).div_ceil(2)];
        let code = unsafe {
            RegGetValueW(
                key.0,
                subkey.as_ptr(),
                ptr::null(),
                RRF_RT_REG_SZ,
                ptr::null_mut(),
                data.as_mut_ptr().cast(),
                &mut size,
            )
        };
        check(code)?;

        let end = data.iter().position(|&c| c == 0).unwrap_or(data.len());
        if end == 0 {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(OsString::from_wide(&data[..end]))))
    }
}
