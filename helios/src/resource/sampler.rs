use ash::vk;

/// Hashable stand-in for [`vk::SamplerCreateInfo`], usable as a cache key.
///
/// Float lod fields are stored as raw bits so the description can implement
/// `Eq` and `Hash`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SamplerDescription {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias_bits: u32,
    pub anisotropy_enable: bool,
    pub max_anisotropy_bits: u32,
    pub compare_op: Option<vk::CompareOp>,
    pub min_lod_bits: u32,
    pub max_lod_bits: u32,
    pub border_color: vk::BorderColor,
    pub reduction_mode: Option<vk::SamplerReductionMode>,
}

impl Default for SamplerDescription {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias_bits: 0f32.to_bits(),
            anisotropy_enable: false,
            max_anisotropy_bits: 1f32.to_bits(),
            compare_op: None,
            min_lod_bits: 0f32.to_bits(),
            max_lod_bits: vk::LOD_CLAMP_NONE.to_bits(),
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            reduction_mode: None,
        }
    }
}

impl SamplerDescription {
    pub fn linear() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            ..Default::default()
        }
    }

    /// The reduction mode, when present, must be chained by the caller since
    /// the create info borrows it.
    pub fn to_create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .mip_lod_bias(f32::from_bits(self.mip_lod_bias_bits))
            .anisotropy_enable(self.anisotropy_enable)
            .max_anisotropy(f32::from_bits(self.max_anisotropy_bits))
            .compare_enable(self.compare_op.is_some())
            .compare_op(self.compare_op.unwrap_or(vk::CompareOp::NEVER))
            .min_lod(f32::from_bits(self.min_lod_bits))
            .max_lod(f32::from_bits(self.max_lod_bits))
            .border_color(self.border_color)
            .unnormalized_coordinates(false)
    }
}
