use super::models::{
    AuthorRecord, CommentRecord, FollowRequestRecord, LikeRecord, NewAuthor, NewPost, PostRecord,
    RemoteCommentRecord, RemoteFollowerRecord, RemoteLikeRecord, RemoteRequestRecord,
};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub trait AuthorRepository {
    fn create(&self, author: &NewAuthor, created_at: &str) -> Result<AuthorRecord>;
    fn get(&self, id: i64) -> Result<Option<AuthorRecord>>;
    fn get_by_username(&self, username: &str) -> Result<Option<AuthorRecord>>;
    fn list(&self, offset: usize, limit: usize) -> Result<Vec<AuthorRecord>>;
}

pub trait PostRepository {
    fn create(&self, post: &NewPost, published: &str) -> Result<PostRecord>;
    fn update(&self, post: &PostRecord) -> Result<()>;
    fn delete(&self, id: i64) -> Result<bool>;
    fn get(&self, id: i64) -> Result<Option<PostRecord>>;
    fn list_for_author(&self, author_id: i64, offset: usize, limit: usize)
        -> Result<Vec<PostRecord>>;
    /// All PUBLIC, listed posts on this instance.
    fn list_public(&self) -> Result<Vec<PostRecord>>;
    /// FRIENDS-visibility posts authored by any of the given authors.
    fn list_friends_authored(&self, author_ids: &[i64]) -> Result<Vec<PostRecord>>;
    fn set_categories(&self, post_id: i64, categories: &[String]) -> Result<()>;
    fn categories_for(&self, post_id: i64) -> Result<Vec<String>>;
}

pub trait CommentRepository {
    fn create(
        &self,
        post_id: i64,
        author_id: i64,
        comment: &str,
        content_type: &str,
        published: &str,
    ) -> Result<CommentRecord>;
    fn get(&self, id: i64) -> Result<Option<CommentRecord>>;
    fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentRecord>>;
    fn count_for_post(&self, post_id: i64) -> Result<i64>;
    fn create_remote(
        &self,
        post_id: i64,
        author_url: &str,
        comment: &str,
        content_type: &str,
        published: &str,
    ) -> Result<RemoteCommentRecord>;
    fn list_remote_for_post(&self, post_id: i64) -> Result<Vec<RemoteCommentRecord>>;
}

pub trait LikeRepository {
    /// Returns false when the (author, post) pair already existed.
    fn like_post(&self, author_id: i64, post_id: i64, created_at: &str) -> Result<bool>;
    fn list_for_post(&self, post_id: i64) -> Result<Vec<LikeRecord>>;
    fn count_for_post(&self, post_id: i64) -> Result<i64>;
    fn list_by_author(&self, author_id: i64) -> Result<Vec<LikeRecord>>;
    fn like_comment(&self, author_id: i64, comment_id: i64, created_at: &str) -> Result<bool>;
    fn unlike_comment(&self, author_id: i64, comment_id: i64) -> Result<bool>;
    fn count_for_comment(&self, comment_id: i64) -> Result<i64>;
    fn remote_like_post(&self, author_url: &str, post_id: i64, created_at: &str) -> Result<bool>;
    fn list_remote_for_post(&self, post_id: i64) -> Result<Vec<RemoteLikeRecord>>;
    fn remote_count_for_post(&self, post_id: i64) -> Result<i64>;
}

pub trait FollowRepository {
    fn follow(&self, follower_id: i64, followee_id: i64, created_at: &str) -> Result<bool>;
    fn unfollow(&self, follower_id: i64, followee_id: i64) -> Result<bool>;
    fn is_following(&self, follower_id: i64, followee_id: i64) -> Result<bool>;
    fn followers_of(&self, followee_id: i64) -> Result<Vec<i64>>;
    /// Authors in a symmetric follow relationship with the given author.
    fn true_friends(&self, author_id: i64) -> Result<Vec<i64>>;
    fn create_request(&self, from_id: i64, to_id: i64, created_at: &str) -> Result<bool>;
    fn request_exists(&self, from_id: i64, to_id: i64) -> Result<bool>;
    fn delete_request(&self, from_id: i64, to_id: i64) -> Result<bool>;
    fn requests_for(&self, to_id: i64) -> Result<Vec<FollowRequestRecord>>;
    fn create_remote_request(&self, from_url: &str, to_id: i64, created_at: &str) -> Result<bool>;
    fn delete_remote_request(&self, from_url: &str, to_id: i64) -> Result<bool>;
    fn remote_requests_for(&self, to_id: i64) -> Result<Vec<RemoteRequestRecord>>;
    fn create_remote_follow(
        &self,
        follower_id: i64,
        followee_url: &str,
        created_at: &str,
    ) -> Result<bool>;
    fn delete_remote_follow(&self, follower_id: i64, followee_url: &str) -> Result<bool>;
    fn create_remote_follower(
        &self,
        follower_url: &str,
        followee_id: i64,
        created_at: &str,
    ) -> Result<bool>;
    fn remote_followers_of(&self, followee_id: i64) -> Result<Vec<RemoteFollowerRecord>>;
}

pub struct SqliteRepositories<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepositories<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn authors(&self) -> impl AuthorRepository + '_ {
        SqliteAuthorRepository { conn: self.conn }
    }

    pub fn posts(&self) -> impl PostRepository + '_ {
        SqlitePostRepository { conn: self.conn }
    }

    pub fn comments(&self) -> impl CommentRepository + '_ {
        SqliteCommentRepository { conn: self.conn }
    }

    pub fn likes(&self) -> impl LikeRepository + '_ {
        SqliteLikeRepository { conn: self.conn }
    }

    pub fn follows(&self) -> impl FollowRepository + '_ {
        SqliteFollowRepository { conn: self.conn }
    }
}

struct SqliteAuthorRepository<'conn> {
    conn: &'conn Connection,
}

fn author_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuthorRecord> {
    Ok(AuthorRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        github_url: row.get(3)?,
        profile_image_url: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl<'conn> AuthorRepository for SqliteAuthorRepository<'conn> {
    fn create(&self, author: &NewAuthor, created_at: &str) -> Result<AuthorRecord> {
        self.conn.execute(
            r#"
            INSERT INTO authors (username, display_name, github_url, profile_image_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                author.username,
                author.display_name,
                author.github_url,
                author.profile_image_url,
                created_at
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(AuthorRecord {
            id,
            username: author.username.clone(),
            display_name: author.display_name.clone(),
            github_url: author.github_url.clone(),
            profile_image_url: author.profile_image_url.clone(),
            created_at: created_at.to_string(),
        })
    }

    fn get(&self, id: i64) -> Result<Option<AuthorRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, username, display_name, github_url, profile_image_url, created_at
                FROM authors
                WHERE id = ?1
                "#,
                params![id],
                author_from_row,
            )
            .optional()?)
    }

    fn get_by_username(&self, username: &str) -> Result<Option<AuthorRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, username, display_name, github_url, profile_image_url, created_at
                FROM authors
                WHERE username = ?1
                "#,
                params![username],
                author_from_row,
            )
            .optional()?)
    }

    fn list(&self, offset: usize, limit: usize) -> Result<Vec<AuthorRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, username, display_name, github_url, profile_image_url, created_at
            FROM authors
            ORDER BY id ASC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], author_from_row)?;
        let mut authors = Vec::new();
        for row in rows {
            authors.push(row?);
        }
        Ok(authors)
    }
}

struct SqlitePostRepository<'conn> {
    conn: &'conn Connection,
}

fn post_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRecord> {
    Ok(PostRecord {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        content_type: row.get(4)?,
        content: row.get(5)?,
        visibility: row.get(6)?,
        unlisted: row.get::<_, i64>(7)? != 0,
        published: row.get(8)?,
    })
}

const POST_COLUMNS: &str =
    "id, author_id, title, description, content_type, content, visibility, unlisted, published";

impl<'conn> PostRepository for SqlitePostRepository<'conn> {
    fn create(&self, post: &NewPost, published: &str) -> Result<PostRecord> {
        self.conn.execute(
            r#"
            INSERT INTO posts (author_id, title, description, content_type, content, visibility, unlisted, published)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                post.author_id,
                post.title,
                post.description,
                post.content_type,
                post.content,
                post.visibility,
                if post.unlisted { 1 } else { 0 },
                published
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(PostRecord {
            id,
            author_id: post.author_id,
            title: post.title.clone(),
            description: post.description.clone(),
            content_type: post.content_type.clone(),
            content: post.content.clone(),
            visibility: post.visibility.clone(),
            unlisted: post.unlisted,
            published: published.to_string(),
        })
    }

    fn update(&self, post: &PostRecord) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE posts
            SET title = ?2, description = ?3, content_type = ?4, content = ?5,
                visibility = ?6, unlisted = ?7
            WHERE id = ?1
            "#,
            params![
                post.id,
                post.title,
                post.description,
                post.content_type,
                post.content,
                post.visibility,
                if post.unlisted { 1 } else { 0 }
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn get(&self, id: i64) -> Result<Option<PostRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                params![id],
                post_from_row,
            )
            .optional()?)
    }

    fn list_for_author(
        &self,
        author_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PostRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts
            WHERE author_id = ?1
            ORDER BY datetime(published) DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#
        ))?;
        let rows = stmt.query_map(params![author_id, limit as i64, offset as i64], post_from_row)?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    fn list_public(&self) -> Result<Vec<PostRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts
            WHERE visibility = 'PUBLIC' AND unlisted = 0
            ORDER BY datetime(published) DESC, id DESC
            "#
        ))?;
        let rows = stmt.query_map([], post_from_row)?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    fn list_friends_authored(&self, author_ids: &[i64]) -> Result<Vec<PostRecord>> {
        let mut posts = Vec::new();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts
            WHERE author_id = ?1 AND visibility = 'FRIENDS' AND unlisted = 0
            ORDER BY datetime(published) DESC, id DESC
            "#
        ))?;
        for author_id in author_ids {
            let rows = stmt.query_map(params![author_id], post_from_row)?;
            for row in rows {
                posts.push(row?);
            }
        }
        Ok(posts)
    }

    fn set_categories(&self, post_id: i64, categories: &[String]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            tx.execute(
                "DELETE FROM post_categories WHERE post_id = ?1",
                params![post_id],
            )?;
            let mut insert_category = tx.prepare(
                "INSERT OR IGNORE INTO categories (category) VALUES (?1)",
            )?;
            let mut link = tx.prepare(
                r#"
                INSERT OR IGNORE INTO post_categories (post_id, category_id)
                SELECT ?1, id FROM categories WHERE category = ?2
                "#,
            )?;
            for category in categories {
                let category = category.trim();
                if category.is_empty() {
                    continue;
                }
                insert_category.execute(params![category])?;
                link.execute(params![post_id, category])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn categories_for(&self, post_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT c.category
            FROM categories c
            JOIN post_categories pc ON pc.category_id = c.id
            WHERE pc.post_id = ?1
            ORDER BY c.category ASC
            "#,
        )?;
        let rows = stmt.query_map(params![post_id], |row| row.get::<_, String>(0))?;
        let mut categories = Vec::new();
        for row in rows {
            categories.push(row?);
        }
        Ok(categories)
    }
}

struct SqliteCommentRepository<'conn> {
    conn: &'conn Connection,
}

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRecord> {
    Ok(CommentRecord {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        comment: row.get(3)?,
        content_type: row.get(4)?,
        published: row.get(5)?,
    })
}

impl<'conn> CommentRepository for SqliteCommentRepository<'conn> {
    fn create(
        &self,
        post_id: i64,
        author_id: i64,
        comment: &str,
        content_type: &str,
        published: &str,
    ) -> Result<CommentRecord> {
        self.conn.execute(
            r#"
            INSERT INTO comments (post_id, author_id, comment, content_type, published)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![post_id, author_id, comment, content_type, published],
        )?;
        Ok(CommentRecord {
            id: self.conn.last_insert_rowid(),
            post_id,
            author_id,
            comment: comment.to_string(),
            content_type: content_type.to_string(),
            published: published.to_string(),
        })
    }

    fn get(&self, id: i64) -> Result<Option<CommentRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, post_id, author_id, comment, content_type, published
                FROM comments
                WHERE id = ?1
                "#,
                params![id],
                comment_from_row,
            )
            .optional()?)
    }

    fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, post_id, author_id, comment, content_type, published
            FROM comments
            WHERE post_id = ?1
            ORDER BY datetime(published) DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![post_id], comment_from_row)?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    fn count_for_post(&self, post_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?)
    }

    fn create_remote(
        &self,
        post_id: i64,
        author_url: &str,
        comment: &str,
        content_type: &str,
        published: &str,
    ) -> Result<RemoteCommentRecord> {
        self.conn.execute(
            r#"
            INSERT INTO remote_comments (post_id, author_url, comment, content_type, published)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![post_id, author_url, comment, content_type, published],
        )?;
        Ok(RemoteCommentRecord {
            id: self.conn.last_insert_rowid(),
            post_id,
            author_url: author_url.to_string(),
            comment: comment.to_string(),
            content_type: content_type.to_string(),
            published: published.to_string(),
        })
    }

    fn list_remote_for_post(&self, post_id: i64) -> Result<Vec<RemoteCommentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, post_id, author_url, comment, content_type, published
            FROM remote_comments
            WHERE post_id = ?1
            ORDER BY datetime(published) DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![post_id], |row| {
            Ok(RemoteCommentRecord {
                id: row.get(0)?,
                post_id: row.get(1)?,
                author_url: row.get(2)?,
                comment: row.get(3)?,
                content_type: row.get(4)?,
                published: row.get(5)?,
            })
        })?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }
}

struct SqliteLikeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> LikeRepository for SqliteLikeRepository<'conn> {
    fn like_post(&self, author_id: i64, post_id: i64, created_at: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO likes (author_id, post_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![author_id, post_id, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn list_for_post(&self, post_id: i64) -> Result<Vec<LikeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT author_id, post_id, created_at
            FROM likes
            WHERE post_id = ?1
            ORDER BY author_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![post_id], |row| {
            Ok(LikeRecord {
                author_id: row.get(0)?,
                post_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut likes = Vec::new();
        for row in rows {
            likes.push(row?);
        }
        Ok(likes)
    }

    fn count_for_post(&self, post_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?)
    }

    fn list_by_author(&self, author_id: i64) -> Result<Vec<LikeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT author_id, post_id, created_at
            FROM likes
            WHERE author_id = ?1
            ORDER BY post_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![author_id], |row| {
            Ok(LikeRecord {
                author_id: row.get(0)?,
                post_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut likes = Vec::new();
        for row in rows {
            likes.push(row?);
        }
        Ok(likes)
    }

    fn like_comment(&self, author_id: i64, comment_id: i64, created_at: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO comment_likes (author_id, comment_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![author_id, comment_id, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn unlike_comment(&self, author_id: i64, comment_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM comment_likes WHERE author_id = ?1 AND comment_id = ?2",
            params![author_id, comment_id],
        )?;
        Ok(deleted > 0)
    }

    fn count_for_comment(&self, comment_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM comment_likes WHERE comment_id = ?1",
            params![comment_id],
            |row| row.get(0),
        )?)
    }

    fn remote_like_post(&self, author_url: &str, post_id: i64, created_at: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO remote_likes (author_url, post_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![author_url, post_id, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn list_remote_for_post(&self, post_id: i64) -> Result<Vec<RemoteLikeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT author_url, post_id, created_at
            FROM remote_likes
            WHERE post_id = ?1
            ORDER BY author_url ASC
            "#,
        )?;
        let rows = stmt.query_map(params![post_id], |row| {
            Ok(RemoteLikeRecord {
                author_url: row.get(0)?,
                post_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut likes = Vec::new();
        for row in rows {
            likes.push(row?);
        }
        Ok(likes)
    }

    fn remote_count_for_post(&self, post_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM remote_likes WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?)
    }
}

struct SqliteFollowRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> FollowRepository for SqliteFollowRepository<'conn> {
    fn follow(&self, follower_id: i64, followee_id: i64, created_at: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![follower_id, followee_id, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn unfollow(&self, follower_id: i64, followee_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
        )?;
        Ok(deleted > 0)
    }

    fn is_following(&self, follower_id: i64, followee_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn followers_of(&self, followee_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT follower_id
            FROM follows
            WHERE followee_id = ?1
            ORDER BY datetime(created_at) DESC, follower_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![followee_id], |row| row.get::<_, i64>(0))?;
        let mut followers = Vec::new();
        for row in rows {
            followers.push(row?);
        }
        Ok(followers)
    }

    fn true_friends(&self, author_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.followee_id
            FROM follows f
            JOIN follows back
              ON back.follower_id = f.followee_id AND back.followee_id = f.follower_id
            WHERE f.follower_id = ?1
            ORDER BY f.followee_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![author_id], |row| row.get::<_, i64>(0))?;
        let mut friends = Vec::new();
        for row in rows {
            friends.push(row?);
        }
        Ok(friends)
    }

    fn create_request(&self, from_id: i64, to_id: i64, created_at: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO follow_requests (from_id, to_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![from_id, to_id, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn request_exists(&self, from_id: i64, to_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM follow_requests WHERE from_id = ?1 AND to_id = ?2",
            params![from_id, to_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete_request(&self, from_id: i64, to_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM follow_requests WHERE from_id = ?1 AND to_id = ?2",
            params![from_id, to_id],
        )?;
        Ok(deleted > 0)
    }

    fn requests_for(&self, to_id: i64) -> Result<Vec<FollowRequestRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT from_id, to_id, created_at
            FROM follow_requests
            WHERE to_id = ?1
            ORDER BY datetime(created_at) DESC, from_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![to_id], |row| {
            Ok(FollowRequestRecord {
                from_id: row.get(0)?,
                to_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    fn create_remote_request(&self, from_url: &str, to_id: i64, created_at: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO remote_requests (from_url, to_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![from_url, to_id, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn delete_remote_request(&self, from_url: &str, to_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM remote_requests WHERE from_url = ?1 AND to_id = ?2",
            params![from_url, to_id],
        )?;
        Ok(deleted > 0)
    }

    fn remote_requests_for(&self, to_id: i64) -> Result<Vec<RemoteRequestRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT from_url, to_id, created_at
            FROM remote_requests
            WHERE to_id = ?1
            ORDER BY datetime(created_at) DESC, from_url ASC
            "#,
        )?;
        let rows = stmt.query_map(params![to_id], |row| {
            Ok(RemoteRequestRecord {
                from_url: row.get(0)?,
                to_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    fn create_remote_follow(
        &self,
        follower_id: i64,
        followee_url: &str,
        created_at: &str,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO remote_follows (follower_id, followee_url, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![follower_id, followee_url, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn delete_remote_follow(&self, follower_id: i64, followee_url: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM remote_follows WHERE follower_id = ?1 AND followee_url = ?2",
            params![follower_id, followee_url],
        )?;
        Ok(deleted > 0)
    }

    fn create_remote_follower(
        &self,
        follower_url: &str,
        followee_id: i64,
        created_at: &str,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO remote_followers (follower_url, followee_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![follower_url, followee_id, created_at],
        )?;
        Ok(inserted > 0)
    }

    fn remote_followers_of(&self, followee_id: i64) -> Result<Vec<RemoteFollowerRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT follower_url, followee_id, created_at
            FROM remote_followers
            WHERE followee_id = ?1
            ORDER BY datetime(created_at) DESC, follower_url ASC
            "#,
        )?;
        let rows = stmt.query_map(params![followee_id], |row| {
            Ok(RemoteFollowerRecord {
                follower_url: row.get(0)?,
                followee_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut followers = Vec::new();
        for row in rows {
            followers.push(row?);
        }
        Ok(followers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MIGRATIONS;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        conn.execute_batch(MIGRATIONS).expect("migrations");
        conn
    }

    fn make_author(repos: &SqliteRepositories<'_>, username: &str) -> AuthorRecord {
        repos
            .authors()
            .create(
                &NewAuthor {
                    username: username.into(),
                    display_name: format!("{username} display"),
                    github_url: None,
                    profile_image_url: None,
                },
                "2024-01-01T00:00:00Z",
            )
            .unwrap()
    }

    fn make_post(repos: &SqliteRepositories<'_>, author_id: i64, visibility: &str) -> PostRecord {
        repos
            .posts()
            .create(
                &NewPost {
                    author_id,
                    title: "First".into(),
                    description: "A post".into(),
                    content_type: "text/plain".into(),
                    content: "Hello".into(),
                    visibility: visibility.into(),
                    unlisted: false,
                },
                "2024-01-01T00:00:01Z",
            )
            .unwrap()
    }

    #[test]
    fn author_and_post_repositories_work() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);

        let author = make_author(&repos, "bob");
        let post = make_post(&repos, author.id, "PUBLIC");

        let fetched = repos.posts().get(post.id).unwrap().unwrap();
        assert_eq!(fetched.title, "First");

        repos
            .posts()
            .set_categories(post.id, &["web".into(), "test".into()])
            .unwrap();
        repos
            .posts()
            .set_categories(post.id, &["web".into(), "rust".into()])
            .unwrap();
        let categories = repos.posts().categories_for(post.id).unwrap();
        assert_eq!(categories, vec!["rust".to_string(), "web".to_string()]);

        let listed = repos.posts().list_for_author(author.id, 0, 10).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn likes_are_idempotent_per_pair() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);

        let author = make_author(&repos, "bob");
        let post = make_post(&repos, author.id, "PUBLIC");

        assert!(repos
            .likes()
            .like_post(author.id, post.id, "2024-01-02T00:00:00Z")
            .unwrap());
        assert!(!repos
            .likes()
            .like_post(author.id, post.id, "2024-01-02T00:00:01Z")
            .unwrap());
        assert_eq!(repos.likes().count_for_post(post.id).unwrap(), 1);

        assert!(repos
            .likes()
            .remote_like_post("https://peer.example/api/v1/authors/9", post.id, "2024-01-02T00:00:02Z")
            .unwrap());
        assert!(!repos
            .likes()
            .remote_like_post("https://peer.example/api/v1/authors/9", post.id, "2024-01-02T00:00:03Z")
            .unwrap());
        assert_eq!(repos.likes().remote_count_for_post(post.id).unwrap(), 1);
        assert_eq!(repos.likes().count_for_post(post.id).unwrap(), 1);
    }

    #[test]
    fn true_friends_require_symmetric_follows() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);

        let bob = make_author(&repos, "bob");
        let alice = make_author(&repos, "alice");

        repos
            .follows()
            .follow(bob.id, alice.id, "2024-01-01T00:00:00Z")
            .unwrap();
        assert!(repos.follows().true_friends(bob.id).unwrap().is_empty());

        repos
            .follows()
            .follow(alice.id, bob.id, "2024-01-01T00:00:01Z")
            .unwrap();
        assert_eq!(repos.follows().true_friends(bob.id).unwrap(), vec![alice.id]);
        assert_eq!(repos.follows().true_friends(alice.id).unwrap(), vec![bob.id]);
    }

    #[test]
    fn follow_requests_are_consumed_once() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);

        let bob = make_author(&repos, "bob");
        let alice = make_author(&repos, "alice");

        assert!(repos
            .follows()
            .create_request(bob.id, alice.id, "2024-01-01T00:00:00Z")
            .unwrap());
        assert!(!repos
            .follows()
            .create_request(bob.id, alice.id, "2024-01-01T00:00:01Z")
            .unwrap());
        assert!(repos.follows().request_exists(bob.id, alice.id).unwrap());

        assert!(repos.follows().delete_request(bob.id, alice.id).unwrap());
        assert!(!repos.follows().delete_request(bob.id, alice.id).unwrap());
    }
}
