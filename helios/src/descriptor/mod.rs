pub mod bindless;

pub use bindless::{
    BindlessTable, COMBINED_IMAGE_SAMPLER_BINDING, SAMPLED_IMAGE_BINDING, SAMPLER_BINDING,
    STORAGE_IMAGE_BINDING,
};
