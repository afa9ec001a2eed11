// Descriptor values for the RHI
//
// Plain data describing the resources the demo asks for. Each maps onto the
// corresponding Vulkan enum or create-info field; nothing here touches the
// device.

use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    R32G32B32Sfloat,
    D24UnormS8Uint,
    D32SfloatS8Uint,
    D32Sfloat,
}

impl Format {
    pub fn to_vk(self) -> vk::Format {
        match self {
            Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::R32G32B32Sfloat => vk::Format::R32G32B32_SFLOAT,
            Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            Format::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
            Format::D32Sfloat => vk::Format::D32_SFLOAT,
        }
    }

    pub fn from_vk(format: vk::Format) -> Option<Self> {
        [
            Format::R8G8B8A8Unorm,
            Format::B8G8R8A8Unorm,
            Format::R32G32B32Sfloat,
            Format::D24UnormS8Uint,
            Format::D32SfloatS8Uint,
            Format::D32Sfloat,
        ]
        .into_iter()
        .find(|f| f.to_vk() == format)
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D24UnormS8Uint | Format::D32SfloatS8Uint | Format::D32Sfloat
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32SfloatS8Uint)
    }

    pub fn aspect_mask(self) -> vk::ImageAspectFlags {
        if self.has_stencil() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    /// Size of one texel, for formats the demo uploads
    pub fn texel_size(self) -> usize {
        match self {
            Format::R8G8B8A8Unorm | Format::B8G8R8A8Unorm => 4,
            Format::R32G32B32Sfloat => 12,
            Format::D24UnormS8Uint | Format::D32Sfloat => 4,
            Format::D32SfloatS8Uint => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Host-visible, persistently mapped uniform data
    ConstantBuffer,
    VertexBuffer,
    IndexBuffer,
}

impl BufferUsage {
    pub fn to_vk(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::ConstantBuffer => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::VertexBuffer => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::IndexBuffer => vk::BufferUsageFlags::INDEX_BUFFER,
        }
    }

    pub fn is_host_visible(self) -> bool {
        matches!(self, BufferUsage::ConstantBuffer)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageUsage {
    Sampled,
    DepthStencil,
    ColorAttachment,
}

impl ImageUsage {
    pub fn to_vk(self) -> vk::ImageUsageFlags {
        match self {
            ImageUsage::Sampled => vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            ImageUsage::DepthStencil => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ImageUsage::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

impl LoadOp {
    pub fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

impl StoreOp {
    pub fn to_vk(self) -> vk::AttachmentStoreOp {
        match self {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        ClearValue::Color([r, g, b, a])
    }

    pub fn depth_stencil(depth: f32, stencil: u32) -> Self {
        ClearValue::DepthStencil { depth, stencil }
    }

    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self::set(0, 1, 0, 1)
    }
}

impl SubresourceRange {
    pub fn set(base_mip: u32, mip_count: u32, base_layer: u32, layer_count: u32) -> Self {
        Self {
            base_mip,
            mip_count,
            base_layer,
            layer_count,
        }
    }

    pub fn to_vk(self, aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: self.base_mip,
            level_count: self.mip_count,
            base_array_layer: self.base_layer,
            layer_count: self.layer_count,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageViewType {
    View2D,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageViewDesc {
    pub format: Format,
    pub view_type: ImageViewType,
    pub range: SubresourceRange,
}

impl ImageViewDesc {
    pub fn view_2d(format: Format) -> Self {
        Self {
            format,
            view_type: ImageViewType::View2D,
            range: SubresourceRange::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

impl Filter {
    pub fn to_vk(self) -> vk::Filter {
        match self {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
}

impl AddressMode {
    pub fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub address_mode: AddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            address_mode: AddressMode::Repeat,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RasterizerDesc {
    pub cull_mode: CullMode,
    pub front_face_ccw: bool,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face_ccw: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare_op: vk::CompareOp::LESS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BlendDesc {
    pub enable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInputAttributeDesc {
    pub location: u32,
    pub format: Format,
    pub offset: u32,
    pub binding: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInputBindingDesc {
    pub binding: u32,
    pub stride: u32,
    pub per_instance: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    ConstantBuffer,
    Sampler,
    SampledImage,
}

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
            DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        }
    }
}

/// One resource slot the pipeline's shaders read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBindingDesc {
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_report_aspects() {
        assert_eq!(
            Format::D24UnormS8Uint.aspect_mask(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(Format::D32Sfloat.aspect_mask(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(Format::R8G8B8A8Unorm.aspect_mask(), vk::ImageAspectFlags::COLOR);
        assert!(!Format::R32G32B32Sfloat.is_depth());
    }

    #[test]
    fn formats_map_back_from_vulkan() {
        assert_eq!(
            Format::from_vk(vk::Format::D24_UNORM_S8_UINT),
            Some(Format::D24UnormS8Uint)
        );
        assert_eq!(Format::from_vk(vk::Format::R16_UINT), None);
    }

    #[test]
    fn clear_values_carry_their_payload() {
        let color = ClearValue::color(0.2, 0.3, 0.4, 0.0).to_vk();
        let depth = ClearValue::depth_stencil(1.0, 0).to_vk();
        // SAFETY: reading back the union member that was written
        unsafe {
            assert_eq!(color.color.float32, [0.2, 0.3, 0.4, 0.0]);
            assert_eq!(depth.depth_stencil.depth, 1.0);
            assert_eq!(depth.depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn default_range_is_single_mip_single_layer() {
        let range = SubresourceRange::default().to_vk(vk::ImageAspectFlags::COLOR);
        assert_eq!((range.base_mip_level, range.level_count), (0, 1));
        assert_eq!((range.base_array_layer, range.layer_count), (0, 1));
    }
}
