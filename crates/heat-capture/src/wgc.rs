//! Low-latency capture through Windows.Graphics.Capture.
//!
//! A free-threaded Direct3D11 frame pool streams the primary monitor;
//! each poll drains the newest frame through a staging texture. This is
//! the "fast" backend: higher throughput than per-poll screenshots, but
//! unavailable where the capture API or a hardware D3D device is not.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tracing::debug;

use windows::core::Interface;
use windows::Graphics::Capture::{
    Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Win32::Foundation::POINT;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAP_READ, D3D11_SDK_VERSION,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Gdi::{MonitorFromPoint, MONITOR_DEFAULTTOPRIMARY};
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;

use crate::{Frame, Region};

pub struct WgcCapture {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    frame_pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    region: Option<Region>,
    running: bool,
}

impl WgcCapture {
    pub fn new() -> Result<Self> {
        let (device, context) = create_d3d11_device()?;
        let item = create_primary_monitor_item()?;
        let size = item.Size()?;
        debug!("Graphics capture item size: {}x{}", size.Width, size.Height);

        let d3d_device = create_direct3d_device(&device)?;
        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &d3d_device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            2,
            size,
        )?;
        let session = frame_pool.CreateCaptureSession(&item)?;

        Ok(Self {
            device,
            context,
            frame_pool,
            session,
            region: None,
            running: false,
        })
    }

    pub(crate) fn start(&mut self, region: Option<Region>) -> Result<()> {
        self.region = region.filter(|r| !r.is_empty());
        self.session.StartCapture()?;
        self.running = true;
        Ok(())
    }

    pub(crate) fn get_latest_frame(&mut self) -> Result<Option<Frame>> {
        // TryGetNextFrame errors out while no frame is queued; that is
        // the non-blocking "nothing ready" case, not a fault.
        let frame = match self.frame_pool.TryGetNextFrame() {
            Ok(frame) => frame,
            Err(_) => return Ok(None),
        };

        let surface = frame.Surface()?;
        let access: IDirect3DDxgiInterfaceAccess = surface.cast()?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };

        let staging_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.Width,
            Height: desc.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: desc.Format,
            SampleDesc: desc.SampleDesc,
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };

        let staging = unsafe {
            let mut staging: Option<ID3D11Texture2D> = None;
            self.device
                .CreateTexture2D(&staging_desc, None, Some(&mut staging))?;
            staging.ok_or_else(|| anyhow!("Failed to create staging texture"))?
        };

        unsafe {
            self.context.CopyResource(
                &staging.cast::<ID3D11Resource>()?,
                &texture.cast::<ID3D11Resource>()?,
            );
        }

        let mapped = unsafe {
            let mut mapped = Default::default();
            self.context.Map(
                &staging.cast::<ID3D11Resource>()?,
                0,
                D3D11_MAP_READ,
                0,
                Some(&mut mapped),
            )?;
            mapped
        };

        // Crop rectangle within the monitor frame. The primary monitor
        // sits at the virtual-screen origin, so region coordinates index
        // the frame directly.
        let (crop_x, crop_y, crop_w, crop_h) = match self.region {
            Some(r) => {
                let x = (r.x.max(0) as u32).min(desc.Width.saturating_sub(1));
                let y = (r.y.max(0) as u32).min(desc.Height.saturating_sub(1));
                (x, y, r.width.min(desc.Width - x), r.height.min(desc.Height - y))
            }
            None => (0, 0, desc.Width, desc.Height),
        };

        let src = unsafe {
            std::slice::from_raw_parts(
                mapped.pData as *const u8,
                (mapped.RowPitch * desc.Height) as usize,
            )
        };
        let row_pitch = mapped.RowPitch as usize;

        let mut img: RgbImage = RgbImage::new(crop_w, crop_h);
        for y in 0..crop_h {
            let src_y = (crop_y + y) as usize;
            for x in 0..crop_w {
                let src_x = (crop_x + x) as usize;
                let offset = src_y * row_pitch + src_x * 4;
                // BGRA -> RGB
                let b = src[offset];
                let g = src[offset + 1];
                let r = src[offset + 2];
                img.put_pixel(x, y, image::Rgb([r, g, b]));
            }
        }

        unsafe {
            self.context.Unmap(&staging.cast::<ID3D11Resource>()?, 0);
        }

        Ok(Some(img))
    }

    pub(crate) fn stop(&mut self) {
        if self.running {
            let _ = self.session.Close();
            let _ = self.frame_pool.Close();
            self.running = false;
        }
        self.region = None;
    }
}

impl Drop for WgcCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn create_d3d11_device() -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;

    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )?;
    }

    Ok((
        device.ok_or_else(|| anyhow!("Failed to create D3D11 device"))?,
        context.ok_or_else(|| anyhow!("Failed to create D3D11 context"))?,
    ))
}

fn create_direct3d_device(
    device: &ID3D11Device,
) -> Result<windows::Graphics::DirectX::Direct3D11::IDirect3DDevice> {
    let dxgi_device: windows::Win32::Graphics::Dxgi::IDXGIDevice = device.cast()?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)? };
    inspectable
        .cast()
        .context("Failed to cast to IDirect3DDevice")
}

fn create_primary_monitor_item() -> Result<GraphicsCaptureItem> {
    let class_name = windows::core::h!("Windows.Graphics.Capture.GraphicsCaptureItem");
    let interop: IGraphicsCaptureItemInterop = unsafe {
        windows::Win32::System::WinRT::RoGetActivationFactory(class_name)
            .context("Failed to get IGraphicsCaptureItemInterop")?
    };

    let hmonitor =
        unsafe { MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY) };
    unsafe {
        interop
            .CreateForMonitor(hmonitor)
            .context("Failed to create capture item for the primary monitor")
    }
}
