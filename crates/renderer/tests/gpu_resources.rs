//! Uploads, buffer growth and pipeline slot bookkeeping on a real device.
//!
//! Each test skips itself when no Vulkan device is available.

use std::sync::Arc;

use ember_core::config::RenderConfig;
use ember_renderer::pipeline_slot::MeshBinding;
use ember_renderer::strategies::{MeshStrategy, SkyboxStrategy, SkyboxUniforms};
use ember_renderer::{
    DeviceContext, GraphicsPipelineSlot, MeshRegistry, PipelineRegistry, RenderPipeline, RendererError,
    TextureBinding,
};
use ember_resources::MeshData;
use ember_rhi::buffer::{Buffer, BufferUsage};
use ember_rhi::growable::GrowableBuffer;
use ember_rhi::sampler::{SamplerFilter, TextureSampler};
use ember_rhi::texture::Texture;
use ember_rhi::vertex::MeshVertex;

fn headless() -> Option<DeviceContext> {
    let config = RenderConfig {
        validation: false,
        ..Default::default()
    };
    match DeviceContext::headless(&config) {
        Ok(context) => Some(context),
        Err(err) => {
            eprintln!("skipping: no Vulkan device ({})", err);
            None
        }
    }
}

fn read_u32s(context: &DeviceContext, buffer: &Buffer, count: usize) -> Vec<u32> {
    let bytes = context
        .upload()
        .read_buffer(buffer, count * std::mem::size_of::<u32>())
        .unwrap();
    bytemuck::pod_collect_to_vec(&bytes)
}

#[test]
fn test_staged_upload_reads_back() {
    let Some(context) = headless() else { return };
    let data: Vec<u32> = (0..256).map(|i| i * 3 + 1).collect();

    let buffer = context
        .upload()
        .create_device_local(BufferUsage::Storage, bytemuck::cast_slice(&data))
        .unwrap();

    assert_eq!(buffer.size(), 1024);
    assert_eq!(read_u32s(&context, &buffer, data.len()), data);
}

#[test]
fn test_read_past_end_is_rejected() {
    let Some(context) = headless() else { return };
    let buffer = context
        .upload()
        .create_device_local(BufferUsage::Storage, &[0u8; 16])
        .unwrap();
    assert!(context.upload().read_buffer(&buffer, 17).is_err());
}

/// Stand-in for the frame's command buffer: record the staged copy and submit.
fn flush<T: bytemuck::Pod>(context: &DeviceContext, buffer: &mut GrowableBuffer<T>) -> bool {
    context.upload().one_shot(|cmd| buffer.record_upload(cmd)).unwrap()
}

#[test]
fn test_growable_fills_to_capacity_without_growing() {
    let Some(context) = headless() else { return };
    let mut vertices = GrowableBuffer::<u32>::new(context.device().clone(), BufferUsage::Vertex, 4).unwrap();
    let handle = vertices.handle();

    assert!(vertices.write(&[1, 2, 3, 4]).unwrap().is_none());
    assert_eq!(vertices.handle(), handle);
    assert_eq!(vertices.capacity(), 4);

    let orphan = vertices.write(&[1, 2, 3, 4, 5]).unwrap();
    assert!(orphan.is_some());
    assert_eq!(vertices.capacity(), 8);
}

#[test]
fn test_write_is_staged_until_the_copy_is_recorded() {
    let Some(context) = headless() else { return };
    let mut vertices = GrowableBuffer::<u32>::new(context.device().clone(), BufferUsage::Vertex, 4).unwrap();
    assert!(!flush(&context, &mut vertices));

    vertices.write(&[7, 8, 9, 10]).unwrap();
    assert!(vertices.has_pending_upload());
    assert!(flush(&context, &mut vertices));
    assert!(!vertices.has_pending_upload());
    assert_eq!(read_u32s(&context, vertices.buffer(), 4), [7, 8, 9, 10]);

    // One copy per write; the staging buffer stays for the next one.
    assert!(!flush(&context, &mut vertices));
    vertices.write(&[1, 1]).unwrap();
    assert!(flush(&context, &mut vertices));
    assert_eq!(read_u32s(&context, vertices.buffer(), 4), [1, 1, 9, 10]);
}

#[test]
fn test_growth_hands_back_the_old_buffers() {
    let Some(context) = headless() else { return };
    let mut vertices = GrowableBuffer::<u32>::new(context.device().clone(), BufferUsage::Vertex, 4).unwrap();
    vertices.write(&[9, 9, 9, 9]).unwrap();
    flush(&context, &mut vertices);
    let old_handle = vertices.handle();

    let data: Vec<u32> = (10..18).collect();
    let orphan = vertices.write(&data).unwrap().unwrap();
    flush(&context, &mut vertices);

    assert_eq!(orphan.buffer.handle(), old_handle);
    assert_eq!(orphan.staging.size(), 16);
    assert_ne!(vertices.handle(), old_handle);
    assert_eq!(vertices.len(), 8);
    assert_eq!(vertices.capacity(), 8);
    assert_eq!(read_u32s(&context, vertices.buffer(), 8), data);

    // The orphan still holds what in-flight frames were drawing from.
    assert_eq!(read_u32s(&context, &orphan.buffer, 4), [9, 9, 9, 9]);
}

#[test]
fn test_detached_buffers_outlive_the_slot_that_drew_them() {
    let Some(context) = headless() else { return };
    let upload = context.upload();
    let mut meshes = MeshRegistry::new();

    let id = meshes.attach(
        upload
            .create_device_local(BufferUsage::Vertex, &[0u8; 64])
            .unwrap(),
        1,
    );
    meshes.detach(id, 0).unwrap();
    assert!(!meshes.contains(id));

    // Slot 1 finishing says nothing about slot 0's draws.
    assert!(meshes.update(1).is_empty());
    let released = meshes.update(0);
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].size(), 64);

    drop(released);
    context.wait_idle().unwrap();
}

fn triangle() -> MeshData<MeshVertex> {
    let vertex = MeshVertex::default();
    MeshData::new("triangle", vec![vertex; 3], vec![0, 1, 2]).unwrap()
}

fn solid_texture(context: &DeviceContext, rgba: [u8; 4]) -> TextureBinding {
    let texture = Texture::from_rgba8(context.upload(), 1, 1, &rgba, false).unwrap();
    let sampler = TextureSampler::new(context.device().clone(), 1, SamplerFilter::Nearest).unwrap();
    TextureBinding::new(texture, Arc::new(sampler))
}

/// Shader code is only consumed by `allocate`, which these tests never call.
fn mesh_slot(context: &DeviceContext) -> GraphicsPipelineSlot<MeshStrategy> {
    GraphicsPipelineSlot::new(
        context.upload().clone(),
        MeshStrategy::from_code(Vec::new(), Vec::new()),
        Some(solid_texture(context, [255; 4])),
    )
    .unwrap()
}

#[test]
fn test_pipeline_slot_defers_detach_to_the_same_slot() {
    let Some(context) = headless() else { return };
    let mut slot = mesh_slot(&context);

    slot.update(0).unwrap();
    let first = slot.attach_model(&triangle(), 1).unwrap();
    let second = slot.attach_model(&triangle(), 4).unwrap();
    assert_ne!(first, second);
    assert_eq!(slot.instance_count(second), Some(4));

    let sets = slot.descriptor_sets(first).unwrap();
    assert_ne!(sets[0], sets[1]);

    slot.detach_model(first).unwrap();
    assert_eq!(slot.live_meshes(), 1);
    assert_eq!(slot.pending_meshes(), 1);

    slot.update(1).unwrap();
    assert_eq!(slot.pending_meshes(), 1);
    slot.update(0).unwrap();
    assert_eq!(slot.pending_meshes(), 0);
    assert_eq!(slot.live_meshes(), 1);
    assert!(!slot.is_allocated());
}

#[test]
fn test_pipeline_slot_rejects_unknown_and_mistyped_bindings() {
    let Some(context) = headless() else { return };
    let mut slot = mesh_slot(&context);
    let id = slot.attach_model(&triangle(), 1).unwrap();
    let buffer = Arc::new(
        context
            .upload()
            .create_device_local(BufferUsage::Storage, &[0u8; 16])
            .unwrap(),
    );

    // Binding 0 is the per-frame uniform, binding 1 the texture.
    assert!(slot.update_buffer(id, 0, buffer.clone()).is_err());
    assert!(slot.update_buffer(id, 1, buffer.clone()).is_err());
    assert!(slot.update_buffer(id, 7, buffer).is_err());

    assert!(slot.set_instance_count(id, 0).is_ok());
    assert_eq!(slot.instance_count(id), Some(0));
}

#[test]
fn test_mesh_without_a_texture_is_rejected_at_attach() {
    let Some(context) = headless() else { return };
    let mut slot = GraphicsPipelineSlot::new(
        context.upload().clone(),
        MeshStrategy::from_code(Vec::new(), Vec::new()),
        None,
    )
    .unwrap();

    let texture = solid_texture(&context, [0, 255, 0, 255]);
    let id = slot
        .attach_model_with(&triangle(), 1, vec![(1, MeshBinding::Texture(texture))])
        .unwrap();
    assert_eq!(slot.draw_calls(0).len(), 1);
    assert_eq!(slot.draw_calls(0)[0].mesh, id);
}

#[test]
fn test_replaced_texture_lives_until_its_slot_comes_round() {
    let Some(context) = headless() else { return };
    let mut slot = mesh_slot(&context);
    let first = solid_texture(&context, [255, 0, 0, 255]);
    let watch = Arc::downgrade(&first.texture);

    slot.update(0).unwrap();
    let id = slot
        .attach_model_with(&triangle(), 1, vec![(1, MeshBinding::Texture(first))])
        .unwrap();
    slot.update(1).unwrap();

    // Swapped while slot 1 is being prepared; slot 0 may still be drawing it.
    slot.update_texture(id, 1, solid_texture(&context, [0, 0, 255, 255])).unwrap();
    assert_eq!(slot.retired_bindings(), 1);
    assert!(watch.upgrade().is_some());

    slot.update(0).unwrap();
    assert!(watch.upgrade().is_some());
    slot.update(1).unwrap();
    assert_eq!(slot.retired_bindings(), 0);
    assert!(watch.upgrade().is_none());
}

#[test]
fn test_pipeline_registered_mid_frame_detaches_at_the_current_slot() {
    let Some(context) = headless() else { return };
    let mut pipelines = PipelineRegistry::new();
    pipelines.update_all(1).unwrap();

    let handle = pipelines.add_pipeline(mesh_slot(&context), 0).unwrap();
    let id = pipelines.attach_model(handle, &triangle(), 1).unwrap();
    pipelines.detach_model(handle, id).unwrap();

    // Slot 1 recorded the mesh, so waiting on slot 0 alone is not enough.
    pipelines.update_all(0).unwrap();
    assert_eq!(pipelines.get_mut(handle).unwrap().pending_meshes(), 1);
    pipelines.update_all(1).unwrap();
    assert_eq!(pipelines.get_mut(handle).unwrap().pending_meshes(), 0);
}

#[test]
fn test_draw_calls_keep_zero_instances_and_drop_detached() {
    let Some(context) = headless() else { return };
    let mut slot = mesh_slot(&context);
    slot.update(0).unwrap();
    let kept = slot.attach_model(&triangle(), 1).unwrap();
    let hidden = slot.attach_model(&triangle(), 1).unwrap();
    let gone = slot.attach_model(&triangle(), 1).unwrap();

    slot.set_instance_count(hidden, 0).unwrap();
    slot.detach_model(gone).unwrap();

    let draws = slot.draw_calls(1);
    let summary: Vec<_> = draws.iter().map(|d| (d.mesh, d.instance_count)).collect();
    assert_eq!(summary, [(kept, 1), (hidden, 0)]);
    assert!(draws.iter().all(|d| d.index_count == 3));
    assert_eq!(draws[0].set, slot.descriptor_sets(kept).unwrap()[1]);
}

#[test]
fn test_unknown_mesh_update_is_an_error() {
    let Some(context) = headless() else { return };
    let mut slot = mesh_slot(&context);
    let id = slot.attach_model(&triangle(), 1).unwrap();
    slot.detach_model(id).unwrap();
    let err = slot.update_texture(id, 1, solid_texture(&context, [0; 4])).unwrap_err();
    assert!(matches!(err, RendererError::UnknownMesh(_)));
}

#[test]
fn test_skybox_slot_draws_a_cubemap() {
    let Some(context) = headless() else { return };
    let faces: [Vec<u8>; 6] = std::array::from_fn(|face| [face as u8 * 40, 0, 0, 255].repeat(16));
    let cubemap = Texture::from_cubemap_rgba8(context.upload(), 4, &faces.each_ref().map(Vec::as_slice)).unwrap();
    assert!(cubemap.is_cubemap());
    assert_eq!(cubemap.mip_levels(), 1);

    let sampler = Arc::new(TextureSampler::new(context.device().clone(), 1, SamplerFilter::Linear).unwrap());
    let mut sky = GraphicsPipelineSlot::new(
        context.upload().clone(),
        SkyboxStrategy::from_code(Vec::new(), Vec::new()),
        Some(TextureBinding::new(cubemap, sampler)),
    )
    .unwrap();
    let id = sky.attach_model(&triangle(), 1).unwrap();
    sky.update_uniform(id, &SkyboxUniforms::default()).unwrap();
    assert_eq!(sky.draw_calls(0).len(), 1);
}

#[test]
fn test_cubemap_faces_must_match_size() {
    let Some(context) = headless() else { return };
    let face = vec![0u8; 4 * 4 * 4];
    let short = vec![0u8; 4];
    let faces: [&[u8]; 6] = [&face, &face, &face, &short, &face, &face];
    assert!(Texture::from_cubemap_rgba8(context.upload(), 4, &faces).is_err());
}
