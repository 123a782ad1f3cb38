// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{EngineResult, VkResultExt};

/// The window's `VkSurfaceKHR`. Must outlive every swap chain built on it and be
/// dropped before the instance.
pub struct WindowSurface {
    loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl WindowSurface {
    pub(crate) unsafe fn new(
        entry: &Entry,
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> EngineResult<Self> {
        let loader = surface::Instance::new(entry, instance);
        let surface = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .creating("window surface")?;
        Ok(Self { loader, surface })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn supports(&self, phys: vk::PhysicalDevice, queue_family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, queue_family, self.surface)
                .unwrap_or(false)
        }
    }

    pub fn capabilities(&self, phys: vk::PhysicalDevice) -> EngineResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(phys, self.surface)
        }
        .creating("surface capabilities query")
    }

    pub fn formats(&self, phys: vk::PhysicalDevice) -> EngineResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(phys, self.surface)
        }
        .creating("surface format query")
    }

    pub fn present_modes(&self, phys: vk::PhysicalDevice) -> EngineResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(phys, self.surface)
        }
        .creating("present mode query")
    }
}

impl Drop for WindowSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}
