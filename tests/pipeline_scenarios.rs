//! End-to-end literal scenarios exercised against the public API rather
//! than internal module state, complementing the inline unit tests
//! colocated with each component.

use audioviz_core::analyzer::window::WindowKind;
use audioviz_core::analyzer::Analyzer;
use audioviz_core::audio::RingBuffer;
use audioviz_core::controls::{Controls, Preset};

#[test]
fn s1_ring_buffer_overrun() {
    let buffer = RingBuffer::new("main_audio", 8, 44100);
    for i in 1..=10 {
        buffer.write(&[i as f32], None).unwrap();
    }
    let stats = buffer.stats();
    assert_eq!(stats.size, 8);
    assert!(stats.overruns >= 1);

    let read = buffer.read(8, None);
    assert_eq!(read, vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
}

#[test]
fn s2_short_read_on_empty_buffer() {
    let buffer = RingBuffer::new("empty", 8, 44100);
    let read = buffer.read(5, None);
    assert!(read.is_empty());
    assert_eq!(buffer.stats().underruns, 1);
}

#[test]
fn s4_fft_dc_matches_literal_figures() {
    let analyzer = Analyzer::new(44100, 128, 0.0, WindowKind::Rectangular).unwrap();
    let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let captured2 = std::sync::Arc::clone(&captured);
    analyzer.on_frequency_data(Box::new(move |frame| {
        captured2.lock().unwrap().push(frame.clone());
    }));

    analyzer.process_samples(&vec![1.0f32; 128]);

    let frames = captured.lock().unwrap();
    let frame = &frames[0];
    assert!((frame.magnitudes[0] - 128.0).abs() < 1e-6);
    for &m in &frame.magnitudes[1..64] {
        assert!(m.abs() < 1e-6);
    }
}

#[test]
fn s5_limiter_clamps_peak_to_threshold() {
    let controls = Controls::new();
    controls.apply_preset(Preset::Disabled);
    controls.set_limiter(true, 0.5);

    let output = controls.process(&[0.8, 0.9, 1.0, 0.7]);
    let peak = output.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    assert!(peak <= 0.5 + 1e-6);
}

#[test]
fn s6_preset_swap_resets_chain_to_music_file() {
    let controls = Controls::new();
    controls.apply_preset(Preset::LiveInput);
    controls.apply_preset(Preset::MusicFile);

    assert_eq!(controls.gain(), 1.0);
    assert_eq!(controls.sensitivity(), 1.0);
    assert!(!controls.agc_enabled());
    assert!(!controls.compressor_enabled());
    assert!(!controls.noise_gate_enabled());
    assert!(controls.limiter_enabled());
    assert_eq!(controls.limiter_threshold(), 0.95);
}
