pub mod frame_walk;
pub mod generator;
pub mod interp_masm;
pub mod registry;
pub mod stub_generator;
