//! Reads at the far edge of a volume whose shape is not a multiple of the
//! block size, laid out like a downsampled FIB-SEM level.

mod common;

use std::sync::Arc;

use common::{init_tracing, test_config, SharedSource, SyntheticSource};
use test_utils::hela::{ARRAY, BLOCK_SIZE, DIMENSIONS};
use test_utils::{assert_region_matches, pattern_u16};
use volume_reader::{ArrayMetadata, DataType, DatasetLayout, DatasetSession};

fn level_path() -> String {
    format!("{}/s3", ARRAY)
}

fn value(coord: &[u64]) -> u16 {
    pattern_u16(coord).max(1)
}

fn setup() -> (Arc<SyntheticSource>, DatasetSession) {
    let source = Arc::new(SyntheticSource::new().with_array(&level_path(), &DIMENSIONS, &BLOCK_SIZE, value));
    let layout = DatasetLayout::new()
        .with_array(
            0,
            0,
            0,
            level_path(),
            ArrayMetadata::n5(DIMENSIONS.to_vec(), BLOCK_SIZE.to_vec(), DataType::UInt16),
        )
        .unwrap();
    let session =
        DatasetSession::with_source(SharedSource(Arc::clone(&source)), layout, test_config(0)).unwrap();
    (source, session)
}

#[tokio::test]
async fn test_last_block_covers_remainder() {
    init_tracing();
    let (_source, session) = setup();
    let view = session.open_view(0, 0, 0).unwrap();

    assert_eq!(view.grid().num_chunks(), vec![8, 7, 10]);
    assert_eq!(view.grid().chunk_origin(&[7, 0, 0]), vec![448, 0, 0]);
    assert_eq!(view.grid().chunk_valid_shape(&[7, 0, 0]), vec![35, 64, 64]);

    // Decoded chunks keep the nominal block shape.
    let chunk = view.chunk(&[7, 0, 0]).await.unwrap();
    assert_eq!(chunk.shape(), &[64, 64, 64]);
    assert_eq!(chunk.get::<u16>(&[34, 0, 0]).unwrap(), value(&[482, 0, 0]));
}

#[tokio::test]
async fn test_region_ending_at_last_voxel() {
    init_tracing();
    let (source, session) = setup();
    let view = session.open_view(0, 0, 0).unwrap();

    let offset = [440u64, 390, 600];
    let size = [43u64, 3, 3];
    let region = view.read_region(&offset, &size).await.unwrap();
    assert_eq!(region.shape(), &size);
    assert_region_matches!(&offset, &size, |c: &[u64]| region.get::<u16>(c).unwrap(), value);

    // x spans blocks 6 and 7; y and z stay in the last block.
    assert_eq!(source.fetches(), 2);
    assert_eq!(source.fetches_of(&format!("{}/7/6/9", level_path())), 1);
}
