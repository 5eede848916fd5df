//! Platform layer: winit windows and Vulkan surfaces.

mod window;

pub use window::{StaticWindow, Surface, Window, WindowStatus};

pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::{KeyCode, PhysicalKey};
