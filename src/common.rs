use uuid::Uuid;

uniffi::custom_type!(Uuid, String, {
    remote,
    try_lift: |uuid| Ok(uuid.parse()?),
    lower: |uuid| uuid.to_string(),
});
