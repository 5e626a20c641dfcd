use crate::error::ConfigError;

/// One layer's batch-size field, as found in a solver's network configuration. A solver's config
/// schema can name this field however it likes (`data_param`, `image_data_param`, and so on
/// across different layer types); this crate generalizes over all of them to any named field a
/// caller hands in, since the concrete network-config schema is an external collaborator's
/// concern, not this crate's.
#[derive(Debug, Clone)]
pub struct LayerBatchSize {
    pub layer_name: String,
    pub batch_size: u64,
}

/// Rewrite every layer's batch size to `batch_size / world_size`, failing (and rewriting
/// nothing) if any one of them does not divide evenly.
pub fn divide_batch_size(layers: &mut [LayerBatchSize], world_size: usize) -> Result<(), ConfigError> {
    for layer in layers.iter() {
        if layer.batch_size % world_size as u64 != 0 {
            return Err(ConfigError::IndivisibleBatchSize {
                batch_size: layer.batch_size,
                world_size,
            });
        }
    }
    for layer in layers.iter_mut() {
        layer.batch_size /= world_size as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divides_every_layer_evenly() {
        let mut layers = vec![
            LayerBatchSize {
                layer_name: "train".into(),
                batch_size: 128,
            },
            LayerBatchSize {
                layer_name: "aux".into(),
                batch_size: 64,
            },
        ];
        divide_batch_size(&mut layers, 4).unwrap();
        assert_eq!(layers[0].batch_size, 32);
        assert_eq!(layers[1].batch_size, 16);
    }

    #[test]
    fn fails_without_modifying_anything_when_not_divisible() {
        let mut layers = vec![LayerBatchSize {
            layer_name: "train".into(),
            batch_size: 130,
        }];
        let err = divide_batch_size(&mut layers, 4).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::IndivisibleBatchSize {
                batch_size: 130,
                world_size: 4
            }
        ));
        assert_eq!(layers[0].batch_size, 130);
    }

    #[test]
    fn rejects_as_soon_as_one_layer_fails_even_if_later_ones_would_divide() {
        let mut layers = vec![
            LayerBatchSize {
                layer_name: "bad".into(),
                batch_size: 130,
            },
            LayerBatchSize {
                layer_name: "good".into(),
                batch_size: 128,
            },
        ];
        assert!(divide_batch_size(&mut layers, 4).is_err());
        assert_eq!(layers[0].batch_size, 130);
        assert_eq!(layers[1].batch_size, 128);
    }
}
