//! Common test fixtures.
//!
//! Shapes, block sizes and sample values of public datasets the reader is
//! routinely pointed at. Axis order is x, y, z as the datasets declare it.

/// FIB-SEM volume of a HeLa cell, N5 on the Janelia COSEM bucket.
pub mod hela {
    pub const ENDPOINT: &str = "https://janelia-cosem.s3.amazonaws.com";
    pub const REGION: &str = "us-west-2";
    pub const BUCKET: &str = "jrc_hela-2";
    pub const ROOT: &str = "jrc_hela-2.n5";
    pub const ARRAY: &str = "em/fibsem-uint16";

    /// A downsampled level whose shape is not a multiple of the block size.
    pub const DIMENSIONS: [u64; 3] = [483, 393, 603];
    pub const BLOCK_SIZE: [u64; 3] = [64, 64, 64];
}

/// Multi-channel spatial transcriptomics image, OME-Zarr on EMBL S3.
pub mod spatial_transcriptomics {
    pub const ENDPOINT: &str = "https://s3.embl.de";
    pub const REGION: &str = "us-west-2";
    pub const BUCKET: &str = "i2k-2020";
    pub const ROOT: &str =
        "spatial-transcriptomics-example/pos42/images/ome-zarr/MMStack_Pos42.ome.zarr";

    pub const CHANNELS: u32 = 4;
    pub const DIMENSIONS: [u64; 3] = [2048, 2048, 6];
    pub const BLOCK_SIZE: [u64; 3] = [512, 512, 1];

    /// Values stored at full resolution: (channel, [x, y, z], value).
    pub const KNOWN_VALUES: [(u32, [u64; 3], u16); 5] = [
        (0, [992, 397, 4], 170),
        (1, [92, 762, 5], 163),
        (1, [405, 1294, 4], 186),
        (1, [737, 900, 3], 177),
        (3, [520, 269, 3], 1143),
    ];
}
