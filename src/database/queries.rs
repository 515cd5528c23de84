pub mod users {
    pub const INSERT: &str = r#"
    INSERT INTO users (username, email, hashed_password)
    VALUES (?, ?, ?)
    "#;

    pub const SELECT_BY_USERNAME: &str = r#"
    SELECT id
         , username
         , email
         , hashed_password
      FROM users
     WHERE username = ?
    "#;

    pub const SELECT_FOR_TOKEN: &str = r#"
    SELECT id
         , username
         , email
      FROM users
     WHERE id = ?
    "#;

    pub const COUNT_BY_USERNAME_OR_EMAIL: &str = r#"
    SELECT COUNT(*)
      FROM users
     WHERE username = ?
        OR email = ?
    "#;
}

pub mod galleries {
    pub const INSERT: &str = r#"
    INSERT INTO galleries (user_id, title, client_name, secret_link)
    VALUES (?, ?, ?, ?)
    "#;

    pub const SELECT_BY_ID: &str = r#"
    SELECT id
         , user_id
         , title
         , client_name
         , secret_link
         , created_at
         , updated_at
      FROM galleries
     WHERE id = ?
    "#;

    pub const SELECT_BY_SECRET_LINK: &str = r#"
    SELECT id
         , user_id
         , title
         , client_name
         , secret_link
         , created_at
         , updated_at
      FROM galleries
     WHERE secret_link = ?
    "#;

    pub const SELECT_FOR_USER: &str = r#"
    SELECT id
         , user_id
         , title
         , client_name
         , secret_link
         , created_at
         , updated_at
      FROM galleries
     WHERE user_id = ?
     ORDER BY created_at DESC, id DESC
    "#;

    pub const TOUCH_UPDATED_AT: &str = r#"
    UPDATE galleries
       SET updated_at = datetime('now')
     WHERE id = ?
    "#;

    pub const DELETE_BY_ID: &str = r#"
    DELETE FROM galleries
     WHERE id = ?
    "#;
}

pub mod media {
    pub const INSERT: &str = r#"
    INSERT INTO gallery_media (gallery_id, url, public_id, file_name, media_type, position)
    VALUES (?, ?, ?, ?, ?, ?)
    "#;

    pub const SELECT_FOR_GALLERY: &str = r#"
    SELECT id
         , url
         , public_id
         , file_name
         , media_type
      FROM gallery_media
     WHERE gallery_id = ?
     ORDER BY position ASC, id ASC
    "#;

    pub const NEXT_POSITION: &str = r#"
    SELECT COALESCE(MAX(position) + 1, 0)
      FROM gallery_media
     WHERE gallery_id = ?
    "#;

    pub const SELECT_BY_PUBLIC_ID: &str = r#"
    SELECT id
      FROM gallery_media
     WHERE gallery_id = ?
       AND public_id = ?
    "#;

    pub const DELETE_BY_PUBLIC_ID: &str = r#"
    DELETE FROM gallery_media
     WHERE gallery_id = ?
       AND public_id = ?
    "#;
}
