//! End-to-end region reads against a synthetic copy of a multi-channel
//! spatial transcriptomics image with values known to be stored in it.

mod common;

use std::sync::Arc;

use common::{init_tracing, test_config, SharedSource, SyntheticSource};
use test_utils::sparse_points;
use test_utils::spatial_transcriptomics::{BLOCK_SIZE, CHANNELS, DIMENSIONS, KNOWN_VALUES};
use volume_reader::{ArrayMetadata, DataType, DatasetLayout, DatasetSession, MemoryOrder};

fn array_path(channel: u32) -> String {
    format!("images/ch{}/s0", channel)
}

fn source() -> Arc<SyntheticSource> {
    let mut source = SyntheticSource::new();
    for channel in 0..CHANNELS {
        let points = KNOWN_VALUES
            .iter()
            .filter(|(c, _, _)| *c == channel)
            .map(|&(_, coord, value)| (coord, value));
        source = source.with_array(
            &array_path(channel),
            &DIMENSIONS,
            &BLOCK_SIZE,
            sparse_points(points),
        );
    }
    Arc::new(source)
}

fn session(source: &Arc<SyntheticSource>) -> DatasetSession {
    let mut layout = DatasetLayout::new();
    for channel in 0..CHANNELS {
        layout
            .insert(
                channel,
                0,
                0,
                array_path(channel),
                ArrayMetadata::n5(DIMENSIONS.to_vec(), BLOCK_SIZE.to_vec(), DataType::UInt16),
            )
            .unwrap();
    }
    DatasetSession::with_source(SharedSource(Arc::clone(source)), layout, test_config(3)).unwrap()
}

#[tokio::test]
async fn test_single_voxel_region_read() {
    init_tracing();
    let source = source();
    let session = session(&source);
    let view = session.open_view(0, 0, 0).unwrap();

    let region = view.read_region(&[992, 397, 4], &[1, 1, 1]).await.unwrap();
    assert_eq!(region.shape(), &[1, 1, 1]);
    assert_eq!(region.to_vec::<u16>().unwrap(), vec![170]);
    assert_eq!(source.fetches(), 1);
    assert_eq!(source.fetches_of("images/ch0/s0/1/0/4"), 1);

    // Served from the cache the second time.
    let again = view.read_region(&[992, 397, 4], &[1, 1, 1]).await.unwrap();
    assert_eq!(again, region);
    assert_eq!(source.fetches(), 1);

    let stats = session.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    test_utils::assert_approx_eq!(stats.hit_rate(), 0.5, 1e-9);
}

#[tokio::test]
async fn test_all_known_values() {
    init_tracing();
    let source = source();
    let session = session(&source);

    for (channel, coord, value) in KNOWN_VALUES {
        let view = session.open_view(channel, 0, 0).unwrap();
        assert_eq!(
            view.read_element::<u16>(&coord).await.unwrap(),
            value,
            "channel {} at {:?}",
            channel,
            coord
        );
    }

    // One stored block per known value; nothing else was touched.
    assert_eq!(source.fetches(), KNOWN_VALUES.len());
}

#[tokio::test]
async fn test_region_around_known_value() {
    init_tracing();
    let source = source();
    let session = session(&source);
    let view = session.open_view(1, 0, 0).unwrap();

    // Straddles blocks (0,1,3) and (1,1,3) along x; only (1,1,3) is stored.
    let offset = [505, 890, 3];
    let size = [240, 20, 1];
    let region = view.read_region(&offset, &size).await.unwrap();
    assert_eq!(region.order(), MemoryOrder::F);

    let mut nonzero = Vec::new();
    for coord in test_utils::region_coords(&size) {
        let v = region.get::<u16>(&coord).unwrap();
        if v != 0 {
            nonzero.push((coord, v));
        }
    }
    assert_eq!(nonzero, vec![(vec![737 - 505, 900 - 890, 0], 177)]);
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_channels_do_not_share_chunks() {
    init_tracing();
    let source = source();
    let session = session(&source);

    // Same coordinate, different channels: distinct cache entries.
    let ch0 = session.open_view(0, 0, 0).unwrap();
    let ch2 = session.open_view(2, 0, 0).unwrap();
    assert_eq!(ch0.read_element::<u16>(&[992, 397, 4]).await.unwrap(), 170);
    assert_eq!(ch2.read_element::<u16>(&[992, 397, 4]).await.unwrap(), 0);

    assert_eq!(session.cache_stats().misses, 2);
    assert_eq!(source.fetches_of("images/ch2/s0/1/0/4"), 1);
}
