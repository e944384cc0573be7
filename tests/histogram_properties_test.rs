// Property tests for histogram computation and codec round-trips
use image_lab::image_handler::histogram::{self, HistogramResult};
use image_lab::image_handler::{DecodedImage, EncodedImage, ImageConfig, ImageFormat, codec};
use proptest::prelude::*;

fn image_strategy(channel_choices: Vec<u8>) -> impl Strategy<Value = DecodedImage> {
    (1u32..24, 1u32..24, prop::sample::select(channel_choices)).prop_flat_map(|(width, height, channels)| {
        prop::collection::vec(any::<u8>(), width as usize * height as usize * channels as usize)
            .prop_map(move |data| DecodedImage::new(width, height, channels, data).expect("valid fixture"))
    })
}

fn totals(result: &HistogramResult) -> Vec<u64> {
    result.channels().iter().map(|hist| hist.total()).collect()
}

proptest! {
    #[test]
    fn test_every_channel_sums_to_pixel_count(image in image_strategy(vec![1, 3, 4])) {
        let result = histogram::compute(&image).expect("compute failed");
        let expected = u64::from(image.width()) * u64::from(image.height());

        for total in totals(&result) {
            prop_assert_eq!(total, expected);
        }
        prop_assert_eq!(result.is_color(), image.channels() != 1);
    }

    #[test]
    fn test_compute_is_deterministic(image in image_strategy(vec![1, 3, 4])) {
        let first = histogram::compute(&image).expect("compute failed");
        let second = histogram::compute(&image).expect("compute failed");
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_partitioned_matches_sequential(
        image in image_strategy(vec![1, 3, 4]),
        rows_per_chunk in 1usize..8,
    ) {
        let sequential = histogram::compute(&image).expect("compute failed");
        let partitioned = histogram::compute_partitioned(&image, rows_per_chunk).expect("partitioned failed");
        prop_assert_eq!(sequential, partitioned);
    }

    #[test]
    fn test_rgba_matches_alpha_stripped_rgb(image in image_strategy(vec![4])) {
        let stripped: Vec<u8> = image
            .data()
            .chunks_exact(4)
            .flat_map(|pixel| pixel[..3].iter().copied())
            .collect();
        let rgb = DecodedImage::new(image.width(), image.height(), 3, stripped).expect("valid fixture");

        prop_assert_eq!(
            histogram::compute(&image).expect("rgba failed"),
            histogram::compute(&rgb).expect("rgb failed")
        );
    }

    #[test]
    fn test_png_round_trip_preserves_pixels(image in image_strategy(vec![1, 2, 3, 4])) {
        let config = ImageConfig::default();
        let encoded = codec::encode(&image, ImageFormat::Png, &config).expect("encode failed");
        let reparsed = EncodedImage::parse(&encoded.to_string()).expect("parse failed");
        let decoded = codec::decode(&reparsed, &config).expect("decode failed");

        prop_assert_eq!(decoded.width(), image.width());
        prop_assert_eq!(decoded.height(), image.height());
        prop_assert_eq!(decoded.channels(), image.channels());
        prop_assert_eq!(decoded.data(), image.data());
    }

    #[test]
    fn test_jpeg_round_trip_preserves_shape(image in image_strategy(vec![1, 3])) {
        let config = ImageConfig::default();
        let encoded = codec::encode(&image, ImageFormat::Jpeg, &config).expect("encode failed");
        let decoded = codec::decode(&encoded, &config).expect("decode failed");

        prop_assert_eq!((decoded.width(), decoded.height()), (image.width(), image.height()));
        prop_assert_eq!(decoded.channels(), image.channels());
    }
}
