use layerfold::{Command, Scene, collapse_layers};

#[test]
fn json_fixture_validates() {
    let s = include_str!("data/demo_scene.json");
    let scene: Scene = serde_json::from_str(s).unwrap();
    scene.validate().unwrap();
}

#[test]
fn fixture_collapses_only_the_plain_layer() {
    let s = include_str!("data/demo_scene.json");
    let mut scene: Scene = serde_json::from_str(s).unwrap();

    let log = collapse_layers(&mut scene.commands);

    assert_eq!(log.len(), 1);
    assert_eq!(log.collapsed[0].open_index, 2);
    assert_eq!(scene.commands[2], Command::Save);
    // The blurred layer keeps its buffer.
    assert!(matches!(scene.commands[6], Command::SaveLayer { .. }));
}

#[test]
fn fixture_renders() {
    let s = include_str!("data/demo_scene.json");
    let scene: Scene = serde_json::from_str(s).unwrap();
    let frame = layerfold::render_scene(&scene).unwrap();
    assert_eq!((frame.width, frame.height), (64, 64));
    assert!(frame.data.iter().any(|&b| b != 0));
}
