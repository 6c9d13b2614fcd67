use std::sync::Arc;
use std::thread;

use tilewright_service::async_ref::ProductionContext;
use tilewright_service::caching::FailureCode;
use tilewright_service::image::PixelBuffer;
use tilewright_service::services::SharedServices;
use tilewright_service::services::source::{DisplayableSource, TileProducer};
use tilewright_sources::{FailureStage, SourceConfig, SourceExtent, TileAddress};

/// Produces the imagery of a synthetic source, taking its configured latency per tile.
#[derive(Debug)]
pub struct SyntheticProducer {
    config: SourceConfig,
}

impl SyntheticProducer {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

impl TileProducer for SyntheticProducer {
    fn extent(&self) -> SourceExtent {
        self.config.common().extent
    }

    fn tile_size(&self) -> u32 {
        self.config.common().tile_size
    }

    fn transform_id(&self) -> &str {
        &self.config.common().transform
    }

    fn credit(&self) -> Option<String> {
        self.config.common().credit.clone()
    }

    fn produce_image(
        &self,
        address: &TileAddress,
        context: &ProductionContext,
    ) -> Result<PixelBuffer, FailureCode> {
        thread::sleep(self.config.common().latency);
        if !context.is_wanted() {
            tracing::trace!(tile = %address, "producing unwanted tile");
        }

        let size = self.tile_size();
        match &self.config {
            SourceConfig::Checkerboard(config) => {
                let square = config.square_size.max(1);
                // squares continue across tile edges
                let offset_x = u64::from(address.col) * u64::from(size);
                let offset_y = u64::from(address.row) * u64::from(size);

                let mut buffer = PixelBuffer::new(size, size);
                for y in 0..size {
                    for x in 0..size {
                        let sx = (offset_x + u64::from(x)) / u64::from(square);
                        let sy = (offset_y + u64::from(y)) / u64::from(square);
                        buffer.put_pixel(x, y, config.colors[((sx + sy) % 2) as usize]);
                    }
                }
                Ok(buffer)
            }
            SourceConfig::Solid(config) => Ok(PixelBuffer::filled(size, size, config.color)),
            SourceConfig::Failing(config) => {
                let message = config.message.clone();
                Err(match config.stage {
                    FailureStage::Fetch => FailureCode::Fetch(message),
                    FailureStage::Decode => FailureCode::Decode(message),
                    FailureStage::Transform => FailureCode::Transform(message),
                })
            }
        }
    }
}

/// Creates a cached source producing the imagery described by `config`.
pub fn create_source(services: &SharedServices, config: &SourceConfig) -> Arc<dyn DisplayableSource> {
    tracing::debug!(
        source = %config.id(),
        kind = config.type_name(),
        "creating synthetic source"
    );
    Arc::new(services.cached_source(
        config.id().clone(),
        SyntheticProducer::new(config.clone()),
    ))
}

#[cfg(test)]
mod tests {
    use tilewright_service::async_ref::Interest;
    use tilewright_service::caching::Caches;
    use tilewright_service::present::Present;
    use tilewright_service::services::source::CachedSource;
    use tilewright_service::test::{self, ManualScheduler};

    use super::*;

    fn produce(yaml: &str, address: TileAddress) -> Present {
        test::setup();
        let config: SourceConfig = serde_yaml::from_str(yaml).unwrap();
        let scheduler = ManualScheduler::new();
        let caches = Caches::new(scheduler.clone());
        let source = CachedSource::new(
            config.id().clone(),
            SyntheticProducer::new(config),
            &caches,
        );

        let mut handle = source.get_image(&address);
        handle.set_interest(Interest::new(1));
        scheduler.run_all();
        handle.present()
    }

    #[test]
    fn test_checkerboard() {
        let yaml = r#"
            type: checkerboard
            id: board
            latency: 0s
            tile_size: 64
            square_size: 16
            colors: [[255, 255, 255, 255], [0, 0, 0, 255]]
        "#;
        let present = produce(yaml, TileAddress::new(1, 0, 3));
        let image = present.image().unwrap();
        image.with_lock(|buffer| {
            assert_eq!(buffer.width(), 64);
            // the tile starts at an even square
            assert_eq!(buffer.pixel(0, 0), Some([255, 255, 255, 255]));
            assert_eq!(buffer.pixel(16, 0), Some([0, 0, 0, 255]));
            assert_eq!(buffer.pixel(16, 16), Some([255, 255, 255, 255]));
        });
    }

    #[test]
    fn test_failure_stages() {
        let yaml = r#"
            type: failing
            id: broken
            stage: transform
            message: projection out of range
            latency: 0s
        "#;
        let present = produce(yaml, TileAddress::new(0, 0, 0));
        assert_eq!(
            present.failure(),
            Some(&FailureCode::Transform("projection out of range".into()))
        );
    }

    #[test]
    fn test_outside_extent() {
        let yaml = r#"
            type: solid
            id: partial
            color: [255, 0, 0, 255]
            latency: 0s
            extent:
              max_zoom: 2
        "#;
        let present = produce(yaml, TileAddress::new(0, 0, 3));
        assert!(matches!(present, Present::OutOfBounds));
    }
}
