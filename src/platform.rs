// Window and event pump
//
// winit owns the event loop; we pump it once per frame instead of handing
// control over, so the frame loop in main stays a plain loop.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;
use crate::frame::WindowSystem;

/// Event-handler side of the platform: flags set from window events.
struct WindowState {
    attributes: Option<WindowAttributes>,
    window: Option<Window>,
    creation_error: Option<winit::error::OsError>,
    close_requested: bool,
    resized: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.attributes.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(window),
            Err(e) => self.creation_error = Some(e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                log::info!("ESC pressed, exiting...");
                self.close_requested = true;
                event_loop.exit();
            }

            _ => {}
        }
    }
}

pub struct Platform {
    // Declared first: the window goes before the loop that created it
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl Platform {
    /// Open the window and pump until the platform has actually created it.
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height));

        let mut platform = Self {
            state: WindowState {
                attributes: Some(attributes),
                window: None,
                creation_error: None,
                close_requested: false,
                resized: false,
            },
            event_loop,
        };

        while platform.state.window.is_none() {
            if let Some(e) = platform.state.creation_error.take() {
                return Err(e).context("Failed to create window");
            }
            if let PumpStatus::Exit(code) = platform.pump(None) {
                anyhow::bail!("Event loop exited with code {} before a window was created", code);
            }
        }

        // Startup events are not a resize
        platform.state.resized = false;
        log::info!("Window: {}x{} ({})", config.width, config.height, config.title);

        Ok(platform)
    }

    fn pump(&mut self, timeout: Option<Duration>) -> PumpStatus {
        self.event_loop.pump_app_events(timeout, &mut self.state)
    }

    /// Handle whatever events are queued without blocking.
    pub fn poll_events(&mut self) {
        if let PumpStatus::Exit(_) = self.pump(Some(Duration::ZERO)) {
            self.state.close_requested = true;
        }
    }

    pub fn should_close(&self) -> bool {
        self.state.close_requested
    }

    pub fn window(&self) -> Result<&Window> {
        self.state.window.as_ref().context("Window not created")
    }

    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let window = self.window()?;
        let display = window.display_handle().context("No display handle")?.as_raw();
        let handle = window.window_handle().context("No window handle")?.as_raw();
        Ok((display, handle))
    }

    pub fn set_title(&self, title: &str) {
        if let Some(window) = &self.state.window {
            window.set_title(title);
        }
    }
}

impl WindowSystem for Platform {
    fn framebuffer_size(&self) -> vk::Extent2D {
        match &self.state.window {
            Some(window) => {
                let size = window.inner_size();
                vk::Extent2D {
                    width: size.width,
                    height: size.height,
                }
            }
            None => vk::Extent2D::default(),
        }
    }

    fn wait_events(&mut self) {
        if let PumpStatus::Exit(_) = self.pump(None) {
            self.state.close_requested = true;
        }
    }

    fn resize_pending(&self) -> bool {
        self.state.resized
    }

    fn clear_resize(&mut self) {
        self.state.resized = false;
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }
}
