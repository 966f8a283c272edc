use sphcrop_core::types::{BucketKey, Layer, Network, Split};

#[test]
fn bucket_stem_pads_tilt_to_three_digits() {
    let key = BucketKey {
        sphere_h: 320,
        ks: 640,
        network: Network::FasterRcnn,
        layer: Layer::Conv2_1,
        tilt: 7,
        split: Split::Train,
    };
    assert_eq!(key.stem(), "tilt007.train");

    let key = BucketKey {
        tilt: 319,
        split: Split::Test,
        ..key
    };
    assert_eq!(key.stem(), "tilt319.test");
}

#[test]
fn layer_names_round_trip_and_accept_conv_prefix() {
    for layer in Layer::ALL {
        assert_eq!(layer.as_str().parse::<Layer>(), Ok(layer));
    }
    assert_eq!("conv4_3".parse::<Layer>(), Ok(Layer::Conv4_3));
    assert!("6_1".parse::<Layer>().is_err());
}

#[test]
fn layer_bottom_is_the_layer_below() {
    assert_eq!(Layer::Conv1_1.bottom(), "pixel");
    assert_eq!(Layer::Conv1_2.bottom(), "1_1");
    assert_eq!(Layer::Conv2_1.bottom(), "1_2");
    assert_eq!(Layer::Conv5_3.bottom(), "5_2");
}

#[test]
fn network_and_split_names() {
    assert_eq!("faster-rcnn".parse::<Network>(), Ok(Network::FasterRcnn));
    assert_eq!("VGG16".parse::<Network>(), Ok(Network::Vgg16));
    assert!("resnet".parse::<Network>().is_err());
    assert_eq!(Split::RUN_ORDER, [Split::Test, Split::Train]);
    assert_eq!("train".parse::<Split>(), Ok(Split::Train));
}
