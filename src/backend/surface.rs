// Presentation surface - binds an OS window to the device
//
// The window's raw handles are captured into a SurfaceDesc first, so the
// platform decision is plain data. The matching VK_KHR_*_surface loader
// then turns it into a vk::SurfaceKHR.

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_ulong, c_void, CStr};
use std::sync::Arc;

use super::VulkanDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceKind {
    Win32,
    Xlib,
    Xcb,
    Wayland,
    Cocoa,
}

/// Native window identity for each supported platform
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceDesc {
    Win32 { hinstance: isize, hwnd: isize },
    Xlib { display: *mut c_void, window: c_ulong },
    Xcb { connection: *mut c_void, window: u32 },
    Wayland { display: *mut c_void, surface: *mut c_void },
    Cocoa { ns_view: *mut c_void },
}

impl SurfaceDesc {
    /// Pick the variant from the window's native handles
    pub fn from_raw(display: RawDisplayHandle, window: RawWindowHandle) -> Result<Self> {
        let desc = match (display, window) {
            (_, RawWindowHandle::Win32(handle)) => SurfaceDesc::Win32 {
                hinstance: handle.hinstance.map_or(0, |h| h.get()),
                hwnd: handle.hwnd.get(),
            },
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => SurfaceDesc::Xlib {
                display: display
                    .display
                    .context("Xlib display handle is null")?
                    .as_ptr(),
                window: window.window,
            },
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => SurfaceDesc::Xcb {
                connection: display
                    .connection
                    .context("XCB connection is null")?
                    .as_ptr(),
                window: window.window.get(),
            },
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
                SurfaceDesc::Wayland {
                    display: display.display.as_ptr(),
                    surface: window.surface.as_ptr(),
                }
            }
            (_, RawWindowHandle::AppKit(window)) => SurfaceDesc::Cocoa {
                ns_view: window.ns_view.as_ptr(),
            },
            (display, window) => {
                anyhow::bail!("Unsupported window system: {:?} / {:?}", display, window)
            }
        };
        Ok(desc)
    }

    pub fn kind(&self) -> SurfaceKind {
        match self {
            SurfaceDesc::Win32 { .. } => SurfaceKind::Win32,
            SurfaceDesc::Xlib { .. } => SurfaceKind::Xlib,
            SurfaceDesc::Xcb { .. } => SurfaceKind::Xcb,
            SurfaceDesc::Wayland { .. } => SurfaceKind::Wayland,
            SurfaceDesc::Cocoa { .. } => SurfaceKind::Cocoa,
        }
    }
}

impl SurfaceKind {
    /// Instance extension the surface is created through
    pub fn extension_name(self) -> &'static CStr {
        match self {
            SurfaceKind::Win32 => khr::Win32Surface::name(),
            SurfaceKind::Xlib => khr::XlibSurface::name(),
            SurfaceKind::Xcb => khr::XcbSurface::name(),
            SurfaceKind::Wayland => khr::WaylandSurface::name(),
            SurfaceKind::Cocoa => ext::MetalSurface::name(),
        }
    }
}

/// A vk::SurfaceKHR plus the loader that destroys it
pub struct PresentationSurface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    kind: SurfaceKind,
    device: Arc<VulkanDevice>,
}

impl PresentationSurface {
    pub fn new(device: Arc<VulkanDevice>, desc: &SurfaceDesc) -> Result<Self> {
        let kind = desc.kind();
        log::info!("Creating {:?} presentation surface", kind);

        if !device
            .surface_extensions
            .iter()
            .any(|name| name.as_c_str() == kind.extension_name())
        {
            anyhow::bail!(
                "{:?} surfaces need {:?}, which the Vulkan loader does not offer",
                kind,
                kind.extension_name()
            );
        }

        let entry = &device.entry;
        let instance = &device.instance;

        let surface = unsafe {
            match *desc {
                SurfaceDesc::Win32 { hinstance, hwnd } => {
                    let info = vk::Win32SurfaceCreateInfoKHR::builder()
                        .hinstance(hinstance as vk::HINSTANCE)
                        .hwnd(hwnd as vk::HWND);
                    khr::Win32Surface::new(entry, instance).create_win32_surface(&info, None)
                }
                SurfaceDesc::Xlib { display, window } => {
                    let info = vk::XlibSurfaceCreateInfoKHR::builder()
                        .dpy(display as *mut _)
                        .window(window);
                    khr::XlibSurface::new(entry, instance).create_xlib_surface(&info, None)
                }
                SurfaceDesc::Xcb { connection, window } => {
                    let info = vk::XcbSurfaceCreateInfoKHR::builder()
                        .connection(connection as *mut _)
                        .window(window);
                    khr::XcbSurface::new(entry, instance).create_xcb_surface(&info, None)
                }
                SurfaceDesc::Wayland { display, surface } => {
                    let info = vk::WaylandSurfaceCreateInfoKHR::builder()
                        .display(display as *mut _)
                        .surface(surface as *mut _);
                    khr::WaylandSurface::new(entry, instance).create_wayland_surface(&info, None)
                }
                // Metal surfaces need a CAMetalLayer attached to the view first
                SurfaceDesc::Cocoa { .. } => {
                    anyhow::bail!("Cocoa windows are not supported by this backend")
                }
            }
        }
        .context("Failed to create window surface")?;

        let loader = khr::Surface::new(entry, instance);

        let supported = unsafe {
            loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )
        }
        .unwrap_or(false);

        if !supported {
            unsafe { loader.destroy_surface(surface, None) };
            anyhow::bail!("Graphics queue cannot present to this surface");
        }

        Ok(Self {
            surface,
            loader,
            kind,
            device,
        })
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        let caps = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(self.device.physical_device, self.surface)
        }?;
        Ok(caps)
    }

    pub fn formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(self.device.physical_device, self.surface)
        }?;
        Ok(formats)
    }

    pub fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        let modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(self.device.physical_device, self.surface)
        }?;
        Ok(modes)
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        AppKitDisplayHandle, AppKitWindowHandle, WaylandDisplayHandle, WaylandWindowHandle,
        Win32WindowHandle, WindowsDisplayHandle, XcbDisplayHandle, XcbWindowHandle,
        XlibDisplayHandle, XlibWindowHandle,
    };
    use std::num::{NonZeroIsize, NonZeroU32};
    use std::ptr::NonNull;

    fn fake_ptr() -> NonNull<c_void> {
        NonNull::dangling()
    }

    #[test]
    fn win32_handles_select_win32() {
        let mut window = Win32WindowHandle::new(NonZeroIsize::new(0x1234).unwrap());
        window.hinstance = NonZeroIsize::new(0x10);
        let desc = SurfaceDesc::from_raw(
            RawDisplayHandle::Windows(WindowsDisplayHandle::new()),
            RawWindowHandle::Win32(window),
        )
        .unwrap();

        assert_eq!(desc, SurfaceDesc::Win32 { hinstance: 0x10, hwnd: 0x1234 });
        assert_eq!(desc.kind().extension_name(), khr::Win32Surface::name());
    }

    #[test]
    fn xlib_needs_a_display() {
        let window = RawWindowHandle::Xlib(XlibWindowHandle::new(42));

        let desc = SurfaceDesc::from_raw(
            RawDisplayHandle::Xlib(XlibDisplayHandle::new(Some(fake_ptr()), 0)),
            window,
        )
        .unwrap();
        assert_eq!(desc.kind(), SurfaceKind::Xlib);

        let missing =
            SurfaceDesc::from_raw(RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)), window);
        assert!(missing.is_err());
    }

    #[test]
    fn xcb_and_wayland_are_distinguished() {
        let xcb = SurfaceDesc::from_raw(
            RawDisplayHandle::Xcb(XcbDisplayHandle::new(Some(fake_ptr()), 0)),
            RawWindowHandle::Xcb(XcbWindowHandle::new(NonZeroU32::new(7).unwrap())),
        )
        .unwrap();
        assert!(matches!(xcb, SurfaceDesc::Xcb { window: 7, .. }));

        let wayland = SurfaceDesc::from_raw(
            RawDisplayHandle::Wayland(WaylandDisplayHandle::new(fake_ptr())),
            RawWindowHandle::Wayland(WaylandWindowHandle::new(fake_ptr())),
        )
        .unwrap();
        assert_eq!(wayland.kind(), SurfaceKind::Wayland);
    }

    #[test]
    fn appkit_maps_to_cocoa() {
        let desc = SurfaceDesc::from_raw(
            RawDisplayHandle::AppKit(AppKitDisplayHandle::new()),
            RawWindowHandle::AppKit(AppKitWindowHandle::new(fake_ptr())),
        )
        .unwrap();
        assert_eq!(desc.kind(), SurfaceKind::Cocoa);
    }

    #[test]
    fn mismatched_handles_are_rejected() {
        let result = SurfaceDesc::from_raw(
            RawDisplayHandle::Wayland(WaylandDisplayHandle::new(fake_ptr())),
            RawWindowHandle::Xlib(XlibWindowHandle::new(1)),
        );
        assert!(result.is_err());
    }
}
